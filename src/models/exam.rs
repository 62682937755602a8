// src/models/exam.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

use crate::models::question::CreateQuestionRequest;

/// Represents the 'exams' table in the database.
///
/// Exams belong to a numbered group (0 is the foundation group) and carry a
/// 1-based `order_in_group` that defines the progression sequence. Only
/// teacher authoring mutates an exam; student actions never do.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,

    pub title: String,

    /// Group number; 0 denotes the foundation group.
    pub exam_group: i64,

    /// Position within the group, unique per group, starting at 1.
    pub order_in_group: i64,

    /// Time limit in minutes. Enforced client-side; a timeout simply
    /// produces a submission with whatever answers were collected.
    pub time_limit_minutes: i64,

    /// Free exams are offered to anonymous visitors; orthogonal to
    /// progression.
    pub is_free_exam: bool,
    pub free_exam_order: Option<i64>,

    pub created_by: i64,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for teacher exam authoring: the exam together with its questions.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,

    #[validate(range(min = 0))]
    pub exam_group: i64,

    #[validate(range(min = 1))]
    pub order_in_group: i64,

    #[validate(range(min = 1, max = 600))]
    pub time_limit_minutes: i64,

    #[serde(default)]
    pub is_free_exam: bool,
    pub free_exam_order: Option<i64>,

    #[validate(length(min = 1, message = "An exam needs at least one question."), nested)]
    pub questions: Vec<CreateQuestionRequest>,
}
