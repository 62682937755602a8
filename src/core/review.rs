// src/core/review.rs

use rand::seq::SliceRandom;
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::{
    core::scoring::{self, AnswerOutcome, QuestionResult, ResultSummary},
    error::AppError,
    models::{
        question::{Choice, Question},
        review_exam::ReviewExam,
    },
};

const REVIEW_COLUMNS: &str =
    "id, student_id, original_exam_id, total_attempts, best_percentage, last_order, created_at";

/// A freshly started review attempt: the questions in presented order plus
/// the permutation the client must echo back on submit.
#[derive(Debug, Serialize)]
pub struct ReviewAttempt {
    pub review_exam_id: i64,
    pub original_exam_id: i64,
    pub total_attempts: i64,
    pub best_percentage: f64,
    /// Question ids in the order they are presented this attempt.
    pub presentation_order: Vec<i64>,
}

/// Result of grading one review attempt.
#[derive(Debug, Serialize)]
pub struct ReviewAttemptResult {
    #[serde(flatten)]
    pub summary: ResultSummary,
    pub total_attempts: i64,
    pub best_percentage: f64,
}

/// Derives the review exam from a completed attempt's detail.
///
/// Selects every wrong or unanswered question, preserving the original
/// exam's question order. A perfect attempt produces nothing: Ok(None),
/// and the caller leaves `review_exam_id` unset. Runs inside the submit
/// transaction; the once-only guarantee comes from the state machine's
/// completed-guard, not from here.
pub async fn generate(
    tx: &mut Transaction<'_, Sqlite>,
    student_id: i64,
    original_exam_id: i64,
    detail: &[QuestionResult],
) -> Result<Option<i64>, AppError> {
    let missed: Vec<&QuestionResult> = detail
        .iter()
        .filter(|q| q.outcome != AnswerOutcome::Correct)
        .collect();

    if missed.is_empty() {
        return Ok(None);
    }

    let inserted = sqlx::query(
        "INSERT INTO review_exams (student_id, original_exam_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(student_id)
    .bind(original_exam_id)
    .bind(chrono::Utc::now())
    .execute(&mut **tx)
    .await?;

    let review_id = inserted.last_insert_rowid();

    for (index, question) in missed.iter().enumerate() {
        sqlx::query(
            "INSERT INTO review_exam_questions (review_exam_id, question_id, position)
             VALUES (?, ?, ?)",
        )
        .bind(review_id)
        .bind(question.question_id)
        .bind((index + 1) as i64)
        .execute(&mut **tx)
        .await?;
    }

    tracing::debug!(
        student_id,
        original_exam_id,
        review_id,
        question_count = missed.len(),
        "Review exam generated"
    );

    Ok(Some(review_id))
}

/// Loads a review exam, scoped to its owning student.
pub async fn fetch_review_exam(
    pool: &SqlitePool,
    student_id: i64,
    review_exam_id: i64,
) -> Result<ReviewExam, AppError> {
    sqlx::query_as::<_, ReviewExam>(&format!(
        "SELECT {} FROM review_exams WHERE id = ? AND student_id = ?",
        REVIEW_COLUMNS
    ))
    .bind(review_exam_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Review exam not found".to_string()))
}

/// The review exam's questions in canonical (original exam) order.
pub async fn fetch_review_questions(
    pool: &SqlitePool,
    review_exam_id: i64,
) -> Result<Vec<Question>, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        "SELECT q.id, q.exam_id, q.position, q.image_ref, q.correct_answer, q.explanation
         FROM review_exam_questions r
         JOIN questions q ON q.id = r.question_id
         WHERE r.review_exam_id = ?
         ORDER BY r.position",
    )
    .bind(review_exam_id)
    .fetch_all(pool)
    .await?;

    Ok(questions)
}

/// Picks a fresh presentation order: a uniform Fisher-Yates permutation,
/// re-rolled if it would repeat the previous attempt's order (impossible to
/// avoid for a single question, so that case passes through).
fn fresh_order(ids: &[i64], previous: Option<&[i64]>) -> Vec<i64> {
    let mut order: Vec<i64> = ids.to_vec();
    let mut rng = rand::rng();

    loop {
        order.shuffle(&mut rng);
        match previous {
            Some(prev) if order.len() > 1 && order == prev => continue,
            _ => return order,
        }
    }
}

/// Starts a new review attempt: shuffles the questions and records the
/// permutation so the next attempt cannot repeat it.
pub async fn start_attempt(
    pool: &SqlitePool,
    student_id: i64,
    review_exam_id: i64,
) -> Result<(ReviewAttempt, Vec<Question>), AppError> {
    let review = fetch_review_exam(pool, student_id, review_exam_id).await?;
    let questions = fetch_review_questions(pool, review_exam_id).await?;

    if questions.is_empty() {
        return Err(AppError::ConfigurationError(
            "Review exam has no questions".to_string(),
        ));
    }

    let previous: Option<Vec<i64>> = review
        .last_order
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    let ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
    let order = fresh_order(&ids, previous.as_deref());

    sqlx::query("UPDATE review_exams SET last_order = ? WHERE id = ?")
        .bind(serde_json::to_string(&order).map_err(|e| {
            AppError::InternalServerError(e.to_string())
        })?)
        .bind(review_exam_id)
        .execute(pool)
        .await?;

    let mut presented: Vec<Question> = Vec::with_capacity(questions.len());
    for id in &order {
        if let Some(q) = questions.iter().find(|q| q.id == *id) {
            presented.push(q.clone());
        }
    }

    Ok((
        ReviewAttempt {
            review_exam_id: review.id,
            original_exam_id: review.original_exam_id,
            total_attempts: review.total_attempts,
            best_percentage: review.best_percentage,
            presentation_order: order,
        },
        presented,
    ))
}

/// Maps answers collected against a shuffled presentation back to the
/// canonical question order.
///
/// `presentation_order` must be a permutation of the canonical question
/// ids; anything else is a malformed submission.
fn unshuffle(
    canonical: &[Question],
    presentation_order: &[i64],
    answers: &[Option<Choice>],
) -> Result<Vec<Option<Choice>>, AppError> {
    if answers.len() != presentation_order.len() {
        return Err(AppError::InvalidSubmission(format!(
            "Expected {} answers, got {}",
            presentation_order.len(),
            answers.len()
        )));
    }

    let mut expected: Vec<i64> = canonical.iter().map(|q| q.id).collect();
    let mut presented: Vec<i64> = presentation_order.to_vec();
    expected.sort_unstable();
    presented.sort_unstable();
    if expected != presented {
        return Err(AppError::InvalidSubmission(
            "presentation_order is not a permutation of the review exam's questions".to_string(),
        ));
    }

    let index_by_id: std::collections::HashMap<i64, usize> = presentation_order
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, index))
        .collect();

    let canonical_answers = canonical
        .iter()
        .map(|question| {
            index_by_id
                .get(&question.id)
                .map(|presented_index| answers[*presented_index])
                .ok_or_else(|| {
                    AppError::InvalidSubmission(
                        "presentation_order is missing a question".to_string(),
                    )
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(canonical_answers)
}

/// Grades one review attempt.
///
/// Reported detail is aligned to the canonical order regardless of how the
/// questions were presented. Counters update monotonically: attempts only
/// grow, the best percentage never decreases, and the original exam's
/// status and score are never touched.
pub async fn grade_attempt(
    pool: &SqlitePool,
    student_id: i64,
    review_exam_id: i64,
    answers: &[Option<Choice>],
    presentation_order: &[i64],
) -> Result<ReviewAttemptResult, AppError> {
    let review = fetch_review_exam(pool, student_id, review_exam_id).await?;
    let questions = fetch_review_questions(pool, review_exam_id).await?;

    if questions.is_empty() {
        return Err(AppError::ConfigurationError(
            "Review exam has no questions".to_string(),
        ));
    }

    let canonical_answers = unshuffle(&questions, presentation_order, answers)?;
    let summary = scoring::grade(&questions, &canonical_answers)?;

    let mut tx = pool.begin().await?;

    // MAX in SQL keeps the update monotone even if two attempts race.
    sqlx::query(
        "UPDATE review_exams SET
             total_attempts = total_attempts + 1,
             best_percentage = MAX(best_percentage, ?)
         WHERE id = ?",
    )
    .bind(summary.percentage)
    .bind(review_exam_id)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query_as::<_, ReviewExam>(&format!(
        "SELECT {} FROM review_exams WHERE id = ?",
        REVIEW_COLUMNS
    ))
    .bind(review_exam_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE exam_progress SET best_review_score = ? WHERE student_id = ? AND exam_id = ?",
    )
    .bind(updated.best_percentage)
    .bind(student_id)
    .bind(review.original_exam_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        student_id,
        review_exam_id,
        attempt = updated.total_attempts,
        percentage = summary.percentage,
        best = updated.best_percentage,
        "Review attempt graded"
    );

    Ok(ReviewAttemptResult {
        summary,
        total_attempts: updated.total_attempts,
        best_percentage: updated.best_percentage,
    })
}
