// src/handlers/teacher.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    core::{
        access,
        events::{DomainEvent, EventHub},
        progression::{self, OverrideAction},
    },
    error::AppError,
    models::{
        exam::CreateExamRequest,
        progress::ProgressStatus,
        user::{CreateUserRequest, ROLE_STUDENT, User},
    },
    utils::{hash::hash_password, jwt::Claims},
};

/// DTO for toggle endpoints.
#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub action: OverrideAction,
}

/// Lists all student accounts.
/// Teacher only.
pub async fn list_students(
    State(pool): State<SqlitePool>,
) -> Result<impl IntoResponse, AppError> {
    let students = sqlx::query_as::<_, User>(
        "SELECT id, username, password, role, created_at FROM users
         WHERE role = ? ORDER BY id DESC",
    )
    .bind(ROLE_STUDENT)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list students: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(students))
}

/// Creates a new student account on the roster.
/// Teacher only. Emits a student-added event.
pub async fn create_student(
    State(pool): State<SqlitePool>,
    State(events): State<EventHub>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let hashed_password = hash_password(&payload.password)?;

    let inserted = sqlx::query("INSERT INTO users (username, password, role) VALUES (?, ?, ?)")
        .bind(&payload.username)
        .bind(&hashed_password)
        .bind(ROLE_STUDENT)
        .execute(&pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Username '{}' already exists", payload.username))
            } else {
                tracing::error!("Failed to create student: {:?}", e);
                AppError::from(e)
            }
        })?;

    let student_id = inserted.last_insert_rowid();

    events.publish(DomainEvent::StudentAdded { student_id }).await;

    Ok((StatusCode::CREATED, Json(json!({ "id": student_id }))))
}

/// Removes a student account.
/// Teacher only. Emits a student-removed event.
pub async fn delete_student(
    State(pool): State<SqlitePool>,
    State(events): State<EventHub>,
    Extension(claims): Extension<Claims>,
    Path(student_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if student_id == claims.user_id() {
        return Err(AppError::BadRequest("Cannot delete yourself".to_string()));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ? AND role = ?")
        .bind(student_id)
        .bind(ROLE_STUDENT)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete student: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Student not found".to_string()));
    }

    events
        .publish(DomainEvent::StudentRemoved { student_id })
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Applies an open/close override to a single exam for one student.
///
/// Refuses with a guard-violation explanation when the exam is in progress
/// or completed; finished and in-flight work is never hidden.
pub async fn toggle_exam(
    State(pool): State<SqlitePool>,
    Path((student_id, exam_id)): Path<(i64, i64)>,
    Json(payload): Json<ToggleRequest>,
) -> Result<impl IntoResponse, AppError> {
    ensure_student(&pool, student_id).await?;
    let exam = progression::fetch_exam(&pool, exam_id).await?;

    let outcome =
        progression::apply_override(&pool, student_id, &exam, payload.action).await?;

    if !outcome.applied {
        let state = match outcome.status {
            ProgressStatus::InProgress => "in progress",
            ProgressStatus::Completed => "completed",
            _ => "not overridable",
        };
        return Err(AppError::GuardViolation(format!(
            "Exam {} is {} and cannot be toggled",
            exam_id, state
        )));
    }

    Ok(Json(outcome))
}

/// Applies an open/close override to every exam in a group for one student.
///
/// Returns per-exam outcomes; exams guarded by in_progress/completed are
/// reported as skipped rather than failing the batch.
pub async fn toggle_group(
    State(pool): State<SqlitePool>,
    Path((student_id, group_number)): Path<(i64, i64)>,
    Json(payload): Json<ToggleRequest>,
) -> Result<impl IntoResponse, AppError> {
    ensure_student(&pool, student_id).await?;

    let outcomes = access::toggle_group(&pool, student_id, group_number, payload.action).await?;

    Ok(Json(json!({
        "group": group_number,
        "outcomes": outcomes,
    })))
}

/// Read-only view of one student's standing in a group: derived group
/// status, cumulative percentage and per-exam statuses.
pub async fn group_overview(
    State(pool): State<SqlitePool>,
    Path((student_id, group_number)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    ensure_student(&pool, student_id).await?;

    let exams = access::fetch_group_exams(&pool, group_number).await?;
    let progress = progression::fetch_progress_map(&pool, student_id).await?;

    let rows: Vec<serde_json::Value> = exams
        .iter()
        .map(|exam| {
            let row = progress.get(&exam.id);
            json!({
                "exam_id": exam.id,
                "title": exam.title,
                "order_in_group": exam.order_in_group,
                "status": progression::effective_status(exam, row),
                "percentage": row.and_then(|p| p.percentage),
                "best_review_score": row.and_then(|p| p.best_review_score),
            })
        })
        .collect();

    Ok(Json(json!({
        "group": group_number,
        "status": access::group_status(&pool, student_id, group_number).await?,
        "cumulative_percentage":
            access::cumulative_percentage(&pool, student_id, group_number).await?,
        "exams": rows,
    })))
}

/// Authors a new exam together with its questions.
/// Teacher only. Published exams are only ever mutated through here, never
/// by student actions.
pub async fn create_exam(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO exams (title, exam_group, order_in_group, time_limit_minutes,
                            is_free_exam, free_exam_order, created_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&payload.title)
    .bind(payload.exam_group)
    .bind(payload.order_in_group)
    .bind(payload.time_limit_minutes)
    .bind(payload.is_free_exam)
    .bind(payload.free_exam_order)
    .bind(claims.user_id())
    .bind(chrono::Utc::now())
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint") {
            AppError::Conflict(format!(
                "Group {} already has an exam at position {}",
                payload.exam_group, payload.order_in_group
            ))
        } else {
            tracing::error!("Failed to create exam: {:?}", e);
            AppError::from(e)
        }
    })?;

    let exam_id = inserted.last_insert_rowid();

    for (index, question) in payload.questions.iter().enumerate() {
        sqlx::query(
            "INSERT INTO questions (exam_id, position, image_ref, correct_answer, explanation)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(exam_id)
        .bind((index + 1) as i64)
        .bind(&question.image_ref)
        .bind(question.correct_answer)
        .bind(&question.explanation)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": exam_id }))))
}

async fn ensure_student(pool: &SqlitePool, student_id: i64) -> Result<(), AppError> {
    sqlx::query_as::<_, (i64,)>("SELECT id FROM users WHERE id = ? AND role = ?")
        .bind(student_id)
        .bind(ROLE_STUDENT)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Student not found".to_string()))?;

    Ok(())
}
