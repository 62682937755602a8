// src/handlers/review.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    core::review,
    error::AppError,
    models::{question::PublicQuestion, review_exam::SubmitReviewAttemptRequest},
    utils::jwt::Claims,
};

/// Review exam summary: attempt counter and best score so far.
pub async fn get_review_exam(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(review_exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let review = review::fetch_review_exam(&pool, claims.user_id(), review_exam_id).await?;
    let questions = review::fetch_review_questions(&pool, review_exam_id).await?;

    Ok(Json(json!({
        "id": review.id,
        "original_exam_id": review.original_exam_id,
        "total_attempts": review.total_attempts,
        "best_percentage": review.best_percentage,
        "question_count": questions.len(),
    })))
}

/// Starts a new review attempt.
///
/// Questions come back freshly shuffled; the client answers against this
/// presentation and echoes `presentation_order` on submit.
pub async fn start_review_attempt(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(review_exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let (attempt, questions) =
        review::start_attempt(&pool, claims.user_id(), review_exam_id).await?;

    let questions: Vec<PublicQuestion> =
        questions.into_iter().map(PublicQuestion::from).collect();

    Ok(Json(json!({
        "review_exam_id": attempt.review_exam_id,
        "original_exam_id": attempt.original_exam_id,
        "total_attempts": attempt.total_attempts,
        "best_percentage": attempt.best_percentage,
        "presentation_order": attempt.presentation_order,
        "questions": questions,
    })))
}

/// Grades a review attempt and returns the updated counters.
///
/// The attempt never touches the original exam's status or score; only
/// `total_attempts` and the monotone `best_percentage` move.
pub async fn submit_review_attempt(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(review_exam_id): Path<i64>,
    Json(payload): Json<SubmitReviewAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = review::grade_attempt(
        &pool,
        claims.user_id(),
        review_exam_id,
        &payload.answers,
        &payload.presentation_order,
    )
    .await?;

    Ok(Json(result))
}
