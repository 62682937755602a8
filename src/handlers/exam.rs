// src/handlers/exam.rs

use std::collections::BTreeSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    core::{access, events::EventHub, progression},
    error::AppError,
    models::{
        progress::{ProgressStatus, SubmitExamRequest},
        question::PublicQuestion,
    },
    utils::jwt::Claims,
};

/// One exam row as the student sees it: metadata plus the effective
/// progression status and any frozen result fields.
#[derive(Debug, Serialize)]
struct StudentExamView {
    id: i64,
    title: String,
    exam_group: i64,
    order_in_group: i64,
    time_limit_minutes: i64,
    status: ProgressStatus,
    score: Option<i64>,
    total_questions: Option<i64>,
    percentage: Option<f64>,
    submitted_at: Option<chrono::DateTime<chrono::Utc>>,
    review_exam_id: Option<i64>,
    best_review_score: Option<f64>,
}

#[derive(Debug, Serialize)]
struct GroupView {
    group: i64,
    status: access::GroupStatus,
    cumulative_percentage: Option<f64>,
}

/// Lists every exam with the student's effective status, plus derived
/// per-group visibility and cumulative percentage.
pub async fn list_exams(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id();

    let exams = sqlx::query_as::<_, crate::models::exam::Exam>(&format!(
        "SELECT {} FROM exams ORDER BY exam_group, order_in_group",
        progression::EXAM_COLUMNS
    ))
    .fetch_all(&pool)
    .await?;

    let progress = progression::fetch_progress_map(&pool, student_id).await?;

    let groups: BTreeSet<i64> = exams.iter().map(|e| e.exam_group).collect();

    let views: Vec<StudentExamView> = exams
        .iter()
        .map(|exam| {
            let row = progress.get(&exam.id);
            StudentExamView {
                id: exam.id,
                title: exam.title.clone(),
                exam_group: exam.exam_group,
                order_in_group: exam.order_in_group,
                time_limit_minutes: exam.time_limit_minutes,
                status: progression::effective_status(exam, row),
                score: row.and_then(|p| p.score),
                total_questions: row.and_then(|p| p.total_questions),
                percentage: row.and_then(|p| p.percentage),
                submitted_at: row.and_then(|p| p.submitted_at),
                review_exam_id: row.and_then(|p| p.review_exam_id),
                best_review_score: row.and_then(|p| p.best_review_score),
            }
        })
        .collect();

    let mut group_views = Vec::with_capacity(groups.len());
    for group in groups {
        group_views.push(GroupView {
            group,
            status: access::group_status(&pool, student_id, group).await?,
            cumulative_percentage: access::cumulative_percentage(&pool, student_id, group)
                .await?,
        });
    }

    Ok(Json(json!({
        "exams": views,
        "groups": group_views,
    })))
}

/// Starts or resumes an exam attempt.
///
/// Returns the questions without their correct answers. Refuses locked
/// exams (403) and completed exams (409).
pub async fn start_exam(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let started = progression::start_exam(&pool, claims.user_id(), exam_id).await?;

    let questions: Vec<PublicQuestion> = started
        .questions
        .into_iter()
        .map(PublicQuestion::from)
        .collect();

    Ok(Json(json!({
        "exam_id": started.exam.id,
        "title": started.exam.title,
        "time_limit_minutes": started.exam.time_limit_minutes,
        "status": started.status,
        "questions": questions,
    })))
}

/// Submits an exam attempt for grading.
///
/// Returns the full result summary with per-question detail (correct
/// answers and explanations are revealed once the attempt is committed).
pub async fn submit_exam(
    State(pool): State<SqlitePool>,
    State(events): State<EventHub>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<SubmitExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = progression::submit_exam(
        &pool,
        &events,
        claims.user_id(),
        exam_id,
        &payload.answers,
    )
    .await?;

    Ok(Json(outcome))
}
