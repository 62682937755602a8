// src/handlers/public.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    core::{progression, scoring},
    error::AppError,
    models::{progress::SubmitExamRequest, question::PublicQuestion},
};

/// The anonymous free-exam pipeline.
///
/// Deliberately separate from the authenticated pipeline: grading runs
/// through the same scoring engine but nothing is persisted — no
/// ExamProgress, no progression, no review exams. The two pipelines are
/// not unified because only the authenticated one produces an
/// authoritative, stored result.

/// Lists the exams offered to anonymous visitors.
pub async fn list_free_exams(State(pool): State<SqlitePool>) -> Result<impl IntoResponse, AppError> {
    let exams = sqlx::query_as::<_, crate::models::exam::Exam>(&format!(
        "SELECT {} FROM exams WHERE is_free_exam = 1 ORDER BY free_exam_order",
        progression::EXAM_COLUMNS
    ))
    .fetch_all(&pool)
    .await?;

    let rows: Vec<serde_json::Value> = exams
        .iter()
        .map(|exam| {
            json!({
                "id": exam.id,
                "title": exam.title,
                "time_limit_minutes": exam.time_limit_minutes,
                "free_exam_order": exam.free_exam_order,
            })
        })
        .collect();

    Ok(Json(rows))
}

/// Returns a free exam's questions (without correct answers).
pub async fn get_free_exam(
    State(pool): State<SqlitePool>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_free_exam(&pool, exam_id).await?;
    let questions = progression::fetch_questions(&pool, exam.id).await?;

    let questions: Vec<PublicQuestion> =
        questions.into_iter().map(PublicQuestion::from).collect();

    Ok(Json(json!({
        "id": exam.id,
        "title": exam.title,
        "time_limit_minutes": exam.time_limit_minutes,
        "questions": questions,
    })))
}

/// Grades an anonymous free-exam attempt. Stateless: the result is
/// returned to the caller and forgotten.
pub async fn grade_free_exam(
    State(pool): State<SqlitePool>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<SubmitExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_free_exam(&pool, exam_id).await?;
    let questions = progression::fetch_questions(&pool, exam.id).await?;

    let summary = scoring::grade(&questions, &payload.answers)?;

    Ok(Json(summary))
}

/// Non-free exams are invisible to the anonymous surface.
async fn fetch_free_exam(
    pool: &SqlitePool,
    exam_id: i64,
) -> Result<crate::models::exam::Exam, AppError> {
    let exam = progression::fetch_exam(pool, exam_id).await?;
    if !exam.is_free_exam {
        return Err(AppError::NotFound("Exam not found".to_string()));
    }
    Ok(exam)
}
