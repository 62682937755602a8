// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// The closed set of answer choices.
///
/// Stored as TEXT ('A'..'D') in the database; kept as an enum in Rust so a
/// malformed choice is unrepresentable past the deserialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Choice {
    A,
    B,
    C,
    D,
}

/// Represents the 'questions' table in the database.
///
/// Questions are image-based: the statement lives in an uploaded image
/// referenced by `image_ref` (upload/storage is outside this service).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    pub exam_id: i64,

    /// 1-based position within the exam; defines the canonical order.
    pub position: i64,

    /// Reference to the question image (storage key or URL).
    pub image_ref: String,

    pub correct_answer: Choice,

    /// Optional explanation shown after grading.
    pub explanation: Option<String>,
}

/// DTO for sending a question to a student (excludes answer and explanation).
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub position: i64,
    pub image_ref: String,
}

impl From<Question> for PublicQuestion {
    fn from(q: Question) -> Self {
        PublicQuestion {
            id: q.id,
            position: q.position,
            image_ref: q.image_ref,
        }
    }
}

/// DTO for creating a question as part of exam authoring.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 500))]
    pub image_ref: String,
    pub correct_answer: Choice,
    #[validate(length(max = 2000))]
    pub explanation: Option<String>,
}
