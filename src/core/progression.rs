// src/core/progression.rs

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    config::DEFAULT_OPEN_GROUPS,
    core::{
        events::{DomainEvent, EventHub},
        review,
        scoring::{self, ResultSummary},
    },
    error::AppError,
    models::{
        exam::Exam,
        progress::{ExamProgress, ProgressStatus},
        question::{Choice, Question},
    },
};

pub const EXAM_COLUMNS: &str =
    "id, title, exam_group, order_in_group, time_limit_minutes, is_free_exam, free_exam_order, \
     created_by, created_at";

pub const PROGRESS_COLUMNS: &str =
    "id, student_id, exam_id, status, score, total_questions, percentage, time_spent_seconds, \
     started_at, submitted_at, review_exam_id, best_review_score";

const QUESTION_COLUMNS: &str = "id, exam_id, position, image_ref, correct_answer, explanation";

/// Teacher override action on an exam or a whole group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideAction {
    Open,
    Close,
}

/// Result of one per-exam override application.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideOutcome {
    pub exam_id: i64,
    pub order_in_group: i64,
    /// False when the exam was skipped because its status is immutable
    /// against overrides (in progress or completed).
    pub applied: bool,
    pub status: ProgressStatus,
}

/// Result of a graded submission.
#[derive(Debug, Serialize)]
pub struct SubmissionOutcome {
    #[serde(flatten)]
    pub summary: ResultSummary,
    pub review_exam_id: Option<i64>,
    pub time_spent_seconds: i64,
}

/// An exam opened for an attempt.
#[derive(Debug)]
pub struct StartedExam {
    pub exam: Exam,
    pub questions: Vec<Question>,
    pub status: ProgressStatus,
}

/// The status of a (student, exam) pair when no progress row exists yet.
///
/// The first exam of the default-open groups is reachable out of the box;
/// everything else starts locked. A persisted row always wins over this
/// default, which is how a teacher "close" sticks on a default-open exam.
pub fn effective_status(exam: &Exam, progress: Option<&ExamProgress>) -> ProgressStatus {
    match progress {
        Some(p) => p.status,
        None => {
            if exam.order_in_group == 1 && DEFAULT_OPEN_GROUPS.contains(&exam.exam_group) {
                ProgressStatus::Unlocked
            } else {
                ProgressStatus::Locked
            }
        }
    }
}

pub async fn fetch_exam(pool: &SqlitePool, exam_id: i64) -> Result<Exam, AppError> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {} FROM exams WHERE id = ?", EXAM_COLUMNS))
        .bind(exam_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Exam not found".to_string()))
}

/// Questions in canonical order.
pub async fn fetch_questions(pool: &SqlitePool, exam_id: i64) -> Result<Vec<Question>, AppError> {
    let questions = sqlx::query_as::<_, Question>(&format!(
        "SELECT {} FROM questions WHERE exam_id = ? ORDER BY position",
        QUESTION_COLUMNS
    ))
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    Ok(questions)
}

pub async fn fetch_progress(
    pool: &SqlitePool,
    student_id: i64,
    exam_id: i64,
) -> Result<Option<ExamProgress>, AppError> {
    let progress = sqlx::query_as::<_, ExamProgress>(&format!(
        "SELECT {} FROM exam_progress WHERE student_id = ? AND exam_id = ?",
        PROGRESS_COLUMNS
    ))
    .bind(student_id)
    .bind(exam_id)
    .fetch_optional(pool)
    .await?;

    Ok(progress)
}

/// All progress rows of one student, keyed by exam id.
pub async fn fetch_progress_map(
    pool: &SqlitePool,
    student_id: i64,
) -> Result<HashMap<i64, ExamProgress>, AppError> {
    let rows = sqlx::query_as::<_, ExamProgress>(&format!(
        "SELECT {} FROM exam_progress WHERE student_id = ?",
        PROGRESS_COLUMNS
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|p| (p.exam_id, p)).collect())
}

/// Starts or resumes an attempt.
///
/// Refuses locked exams with AccessDenied and completed exams with
/// AlreadyCompleted (the review exam is the repeatable path). The
/// unlocked -> in_progress transition is idempotent: re-entering an
/// in-progress exam changes nothing and `started_at` is stamped only once.
pub async fn start_exam(
    pool: &SqlitePool,
    student_id: i64,
    exam_id: i64,
) -> Result<StartedExam, AppError> {
    let exam = fetch_exam(pool, exam_id).await?;
    let progress = fetch_progress(pool, student_id, exam_id).await?;

    match effective_status(&exam, progress.as_ref()) {
        ProgressStatus::Locked => {
            return Err(AppError::AccessDenied("Exam is locked".to_string()));
        }
        ProgressStatus::Completed => {
            return Err(AppError::AlreadyCompleted(
                "Exam already completed; retake mistakes via its review exam".to_string(),
            ));
        }
        ProgressStatus::Unlocked => {
            sqlx::query(
                "INSERT INTO exam_progress (student_id, exam_id, status, started_at)
                 VALUES (?, ?, 'in_progress', ?)
                 ON CONFLICT(student_id, exam_id) DO UPDATE SET
                     status = 'in_progress',
                     started_at = COALESCE(exam_progress.started_at, excluded.started_at)
                 WHERE exam_progress.status = 'unlocked'",
            )
            .bind(student_id)
            .bind(exam_id)
            .bind(Utc::now())
            .execute(pool)
            .await?;
        }
        ProgressStatus::InProgress => {}
    }

    let questions = fetch_questions(pool, exam_id).await?;

    Ok(StartedExam {
        exam,
        questions,
        status: ProgressStatus::InProgress,
    })
}

/// Grades a submission and commits the in_progress -> completed transition.
///
/// Ordering matters here:
/// 1. all validation and the pure grading pass happen before any write;
/// 2. the completed-guard is re-checked inside the UPDATE's WHERE clause,
///    so of two racing submissions exactly one commits and the other is
///    rejected with AlreadyCompleted;
/// 3. the review exam is generated in the same transaction as the status
///    write (first completion only, which the guard guarantees);
/// 4. the successor unlock and the event emission follow the commit —
///    a reader may briefly see exam N completed while N+1 is still locked.
pub async fn submit_exam(
    pool: &SqlitePool,
    events: &EventHub,
    student_id: i64,
    exam_id: i64,
    answers: &[Option<Choice>],
) -> Result<SubmissionOutcome, AppError> {
    let exam = fetch_exam(pool, exam_id).await?;
    let progress = fetch_progress(pool, student_id, exam_id).await?;

    match effective_status(&exam, progress.as_ref()) {
        ProgressStatus::Locked => {
            return Err(AppError::AccessDenied("Exam is locked".to_string()));
        }
        ProgressStatus::Completed => {
            return Err(AppError::AlreadyCompleted(
                "Exam already completed".to_string(),
            ));
        }
        ProgressStatus::Unlocked | ProgressStatus::InProgress => {}
    }

    let questions = fetch_questions(pool, exam_id).await?;
    let summary = scoring::grade(&questions, answers)?;

    let now = Utc::now();
    let time_spent_seconds = progress
        .as_ref()
        .and_then(|p| p.started_at)
        .map(|started| (now - started).num_seconds().max(0))
        .unwrap_or(0);

    let mut tx = pool.begin().await?;

    // Make sure the row exists before the guarded update; a submission
    // straight from the default-unlocked state has no row yet.
    sqlx::query(
        "INSERT OR IGNORE INTO exam_progress (student_id, exam_id, status) VALUES (?, ?, 'unlocked')",
    )
    .bind(student_id)
    .bind(exam_id)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        "UPDATE exam_progress SET
             status = 'completed',
             score = ?,
             total_questions = ?,
             percentage = ?,
             time_spent_seconds = ?,
             submitted_at = ?
         WHERE student_id = ? AND exam_id = ? AND status != 'completed'",
    )
    .bind(summary.score)
    .bind(summary.total_questions)
    .bind(summary.percentage)
    .bind(time_spent_seconds)
    .bind(now)
    .bind(student_id)
    .bind(exam_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        // A concurrent submission won the race; the first result stands.
        return Err(AppError::AlreadyCompleted(
            "Exam already completed".to_string(),
        ));
    }

    let review_exam_id =
        review::generate(&mut tx, student_id, exam.id, &summary.detail).await?;

    if let Some(review_id) = review_exam_id {
        sqlx::query(
            "UPDATE exam_progress SET review_exam_id = ? WHERE student_id = ? AND exam_id = ?",
        )
        .bind(review_id)
        .bind(student_id)
        .bind(exam_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    unlock_successor(pool, student_id, &exam).await?;

    events
        .publish(DomainEvent::ExamSubmitted {
            student_id,
            exam_id,
            percentage: summary.percentage,
        })
        .await;

    tracing::info!(
        student_id,
        exam_id,
        score = summary.score,
        percentage = summary.percentage,
        "Exam submitted"
    );

    Ok(SubmissionOutcome {
        summary,
        review_exam_id,
        time_spent_seconds,
    })
}

/// Cascade step: unlocks the `(group, order + 1)` successor, if one exists.
///
/// The successor lookup is a keyed fetch, not a list traversal. The write
/// is deliberately outside the submit transaction (one record per logical
/// update); in-progress and completed successors are left untouched.
async fn unlock_successor(
    pool: &SqlitePool,
    student_id: i64,
    completed: &Exam,
) -> Result<(), AppError> {
    let successor = sqlx::query_as::<_, Exam>(&format!(
        "SELECT {} FROM exams WHERE exam_group = ? AND order_in_group = ?",
        EXAM_COLUMNS
    ))
    .bind(completed.exam_group)
    .bind(completed.order_in_group + 1)
    .fetch_optional(pool)
    .await?;

    let Some(next) = successor else {
        return Ok(());
    };

    sqlx::query(
        "INSERT INTO exam_progress (student_id, exam_id, status) VALUES (?, ?, 'unlocked')
         ON CONFLICT(student_id, exam_id) DO UPDATE SET status = 'unlocked'
         WHERE exam_progress.status NOT IN ('in_progress', 'completed')",
    )
    .bind(student_id)
    .bind(next.id)
    .execute(pool)
    .await?;

    tracing::debug!(
        student_id,
        exam_id = next.id,
        group = next.exam_group,
        "Unlocked successor exam"
    );

    Ok(())
}

/// Applies a teacher override to one exam.
///
/// Work in flight or finished is never silently hidden: in_progress and
/// completed records are reported as skipped, with the row left untouched.
/// "Open" creates the progress row when none exists yet; "close" does too,
/// which is how the default-open first exam of a group gets locked.
pub async fn apply_override(
    pool: &SqlitePool,
    student_id: i64,
    exam: &Exam,
    action: OverrideAction,
) -> Result<OverrideOutcome, AppError> {
    let progress = fetch_progress(pool, student_id, exam.id).await?;
    let current = effective_status(exam, progress.as_ref());

    if !current.overridable() {
        return Ok(OverrideOutcome {
            exam_id: exam.id,
            order_in_group: exam.order_in_group,
            applied: false,
            status: current,
        });
    }

    let target = match action {
        OverrideAction::Open => ProgressStatus::Unlocked,
        OverrideAction::Close => ProgressStatus::Locked,
    };

    sqlx::query(
        "INSERT INTO exam_progress (student_id, exam_id, status) VALUES (?, ?, ?)
         ON CONFLICT(student_id, exam_id) DO UPDATE SET status = excluded.status
         WHERE exam_progress.status IN ('locked', 'unlocked')",
    )
    .bind(student_id)
    .bind(exam.id)
    .bind(target)
    .execute(pool)
    .await?;

    tracing::info!(
        student_id,
        exam_id = exam.id,
        action = ?action,
        "Teacher override applied"
    );

    Ok(OverrideOutcome {
        exam_id: exam.id,
        order_in_group: exam.order_in_group,
        applied: true,
        status: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exam(group: i64, order: i64) -> Exam {
        Exam {
            id: group * 100 + order,
            title: format!("Exam {}-{}", group, order),
            exam_group: group,
            order_in_group: order,
            time_limit_minutes: 30,
            is_free_exam: false,
            free_exam_order: None,
            created_by: 1,
            created_at: None,
        }
    }

    fn progress(status: ProgressStatus) -> ExamProgress {
        ExamProgress {
            id: 1,
            student_id: 1,
            exam_id: 1,
            status,
            score: None,
            total_questions: None,
            percentage: None,
            time_spent_seconds: None,
            started_at: None,
            submitted_at: None,
            review_exam_id: None,
            best_review_score: None,
        }
    }

    #[test]
    fn test_default_open_groups_first_exam_is_unlocked() {
        assert_eq!(
            effective_status(&exam(0, 1), None),
            ProgressStatus::Unlocked
        );
        assert_eq!(
            effective_status(&exam(1, 1), None),
            ProgressStatus::Unlocked
        );
    }

    #[test]
    fn test_later_exams_and_groups_default_locked() {
        assert_eq!(effective_status(&exam(1, 2), None), ProgressStatus::Locked);
        assert_eq!(effective_status(&exam(2, 1), None), ProgressStatus::Locked);
    }

    #[test]
    fn test_persisted_row_wins_over_default() {
        // A teacher "close" on the default-open exam sticks.
        assert_eq!(
            effective_status(&exam(1, 1), Some(&progress(ProgressStatus::Locked))),
            ProgressStatus::Locked
        );
        assert_eq!(
            effective_status(&exam(2, 3), Some(&progress(ProgressStatus::Completed))),
            ProgressStatus::Completed
        );
    }

    #[test]
    fn test_override_guard() {
        assert!(ProgressStatus::Locked.overridable());
        assert!(ProgressStatus::Unlocked.overridable());
        assert!(!ProgressStatus::InProgress.overridable());
        assert!(!ProgressStatus::Completed.overridable());
    }
}
