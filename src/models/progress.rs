// src/models/progress.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::models::question::Choice;

/// Per-(student, exam) progression status.
///
/// A closed set rather than a free string: every consumer pattern-matches
/// exhaustively, so adding a status is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProgressStatus {
    Locked,
    Unlocked,
    InProgress,
    Completed,
}

impl ProgressStatus {
    /// Whether a teacher override may still touch this record.
    /// In-flight and finished work is immutable against overrides.
    pub fn overridable(self) -> bool {
        matches!(self, ProgressStatus::Locked | ProgressStatus::Unlocked)
    }
}

/// Represents the 'exam_progress' table in the database.
///
/// Exactly one row exists per (student, exam) pair once created; rows are
/// created lazily on first unlock and are never deleted, only transitioned.
/// Score fields are frozen at submission time: later edits to the exam do
/// not rewrite them.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamProgress {
    pub id: i64,
    pub student_id: i64,
    pub exam_id: i64,
    pub status: ProgressStatus,

    pub score: Option<i64>,
    pub total_questions: Option<i64>,
    pub percentage: Option<f64>,
    pub time_spent_seconds: Option<i64>,

    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Set once a review exam has been generated for this completion.
    pub review_exam_id: Option<i64>,
    /// Mirror of the review exam's best percentage; monotone.
    pub best_review_score: Option<f64>,
}

/// DTO for submitting an exam attempt.
///
/// `answers` is positional: one entry per question in canonical exam order,
/// `null` meaning unanswered. A length mismatch is rejected outright.
#[derive(Debug, Deserialize)]
pub struct SubmitExamRequest {
    pub answers: Vec<Option<Choice>>,
}
