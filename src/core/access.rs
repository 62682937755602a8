// src/core/access.rs

use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    core::{
        progression::{self, OverrideAction, OverrideOutcome},
        scoring::round2,
    },
    error::AppError,
    models::{exam::Exam, progress::ProgressStatus},
};

/// Derived visibility of a whole exam group for one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Locked,
    Unlocked,
}

/// All exams of one group, in progression order.
pub async fn fetch_group_exams(
    pool: &SqlitePool,
    group_number: i64,
) -> Result<Vec<Exam>, AppError> {
    let exams = sqlx::query_as::<_, Exam>(&format!(
        "SELECT {} FROM exams WHERE exam_group = ? ORDER BY order_in_group",
        progression::EXAM_COLUMNS
    ))
    .bind(group_number)
    .fetch_all(pool)
    .await?;

    Ok(exams)
}

/// Group visibility, recomputed from the authoritative per-exam records.
///
/// Unlocked iff any exam in the group is unlocked, in progress or
/// completed. Never stored: deriving on read is what keeps it from
/// diverging from the per-exam state.
pub async fn group_status(
    pool: &SqlitePool,
    student_id: i64,
    group_number: i64,
) -> Result<GroupStatus, AppError> {
    let exams = fetch_group_exams(pool, group_number).await?;
    let progress = progression::fetch_progress_map(pool, student_id).await?;

    let any_open = exams.iter().any(|exam| {
        progression::effective_status(exam, progress.get(&exam.id)) != ProgressStatus::Locked
    });

    if any_open {
        Ok(GroupStatus::Unlocked)
    } else {
        Ok(GroupStatus::Locked)
    }
}

/// Applies a teacher override to every exam in a group.
///
/// The completed/in_progress guard is evaluated per exam: some rows
/// toggling while others are skipped is a normal outcome, reported row by
/// row rather than failing the batch.
pub async fn toggle_group(
    pool: &SqlitePool,
    student_id: i64,
    group_number: i64,
    action: OverrideAction,
) -> Result<Vec<OverrideOutcome>, AppError> {
    let exams = fetch_group_exams(pool, group_number).await?;

    if exams.is_empty() {
        return Err(AppError::NotFound(format!(
            "No exams in group {}",
            group_number
        )));
    }

    let mut outcomes = Vec::with_capacity(exams.len());
    for exam in &exams {
        outcomes.push(progression::apply_override(pool, student_id, exam, action).await?);
    }

    Ok(outcomes)
}

/// Question-count-weighted cumulative percentage for a group's completed
/// exams: 100 * sum(score) / sum(total_questions), not a mean of per-exam
/// percentages.
///
/// Derived on read. `total_questions` was frozen on each progress record
/// at submission time, so the value stays stable even if an exam is edited
/// after grading. None when the student has completed nothing in the group.
pub async fn cumulative_percentage(
    pool: &SqlitePool,
    student_id: i64,
    group_number: i64,
) -> Result<Option<f64>, AppError> {
    let (score_sum, total_sum) = sqlx::query_as::<_, (i64, i64)>(
        "SELECT COALESCE(SUM(p.score), 0), COALESCE(SUM(p.total_questions), 0)
         FROM exam_progress p
         JOIN exams e ON e.id = p.exam_id
         WHERE p.student_id = ? AND e.exam_group = ? AND p.status = 'completed'",
    )
    .bind(student_id)
    .bind(group_number)
    .fetch_one(pool)
    .await?;

    Ok(weighted_percentage(score_sum, total_sum))
}

fn weighted_percentage(score_sum: i64, total_sum: i64) -> Option<f64> {
    if total_sum == 0 {
        return None;
    }
    Some(round2(100.0 * score_sum as f64 / total_sum as f64))
}
