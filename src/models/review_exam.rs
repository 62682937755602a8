// src/models/review_exam.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::models::question::Choice;

/// Represents the 'review_exams' table in the database.
///
/// A review exam is derived exactly once from the wrong/unanswered
/// questions of one student's completed exam, and is owned by that student.
/// Attempts are folded into the counters here; they are not stored
/// individually.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReviewExam {
    pub id: i64,
    pub student_id: i64,
    pub original_exam_id: i64,

    pub total_attempts: i64,

    /// Best percentage across all attempts; monotonically non-decreasing.
    pub best_percentage: f64,

    /// JSON array of question ids in the order they were last presented.
    /// Used to avoid handing out the same permutation twice in a row.
    #[serde(skip)]
    pub last_order: Option<String>,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for submitting a review attempt.
///
/// Answers are collected against the shuffled presentation, so the client
/// echoes back `presentation_order` (question ids in presented order) and
/// the server maps everything to canonical order before grading.
#[derive(Debug, Deserialize)]
pub struct SubmitReviewAttemptRequest {
    pub answers: Vec<Option<Choice>>,
    pub presentation_order: Vec<i64>,
}
