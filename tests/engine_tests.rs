// tests/engine_tests.rs
//
// Engine-level integration tests: the progression state machine, review
// generation/attempts and the group authority, driven directly against an
// in-memory SQLite pool.

use examtrek::core::events::{DomainEvent, EventHub};
use examtrek::core::{access, progression, review};
use examtrek::error::AppError;
use examtrek::models::progress::ProgressStatus;
use examtrek::models::question::Choice;
use examtrek::core::progression::OverrideAction;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate test database");

    pool
}

async fn seed_user(pool: &SqlitePool, role: &str) -> i64 {
    let username = format!("u_{}", &uuid::Uuid::new_v4().to_string()[..8]);
    sqlx::query("INSERT INTO users (username, password, role) VALUES (?, 'hash', ?)")
        .bind(username)
        .bind(role)
        .execute(pool)
        .await
        .expect("Failed to seed user")
        .last_insert_rowid()
}

/// Seeds an exam with one question per entry of `correct`, all positions
/// in order.
async fn seed_exam(
    pool: &SqlitePool,
    teacher_id: i64,
    group: i64,
    order: i64,
    correct: &[Choice],
) -> i64 {
    let exam_id = sqlx::query(
        "INSERT INTO exams (title, exam_group, order_in_group, time_limit_minutes, created_by, created_at)
         VALUES (?, ?, ?, 30, ?, ?)",
    )
    .bind(format!("Exam {}-{}", group, order))
    .bind(group)
    .bind(order)
    .bind(teacher_id)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await
    .expect("Failed to seed exam")
    .last_insert_rowid();

    for (index, answer) in correct.iter().enumerate() {
        sqlx::query(
            "INSERT INTO questions (exam_id, position, image_ref, correct_answer)
             VALUES (?, ?, ?, ?)",
        )
        .bind(exam_id)
        .bind((index + 1) as i64)
        .bind(format!("img/{}_{}.png", exam_id, index + 1))
        .bind(*answer)
        .execute(pool)
        .await
        .expect("Failed to seed question");
    }

    exam_id
}

async fn status_of(pool: &SqlitePool, student_id: i64, exam_id: i64) -> ProgressStatus {
    let exam = progression::fetch_exam(pool, exam_id).await.unwrap();
    let progress = progression::fetch_progress(pool, student_id, exam_id)
        .await
        .unwrap();
    progression::effective_status(&exam, progress.as_ref())
}

/// Maps canonical answers onto a presentation order for a review attempt.
fn present(
    canonical_ids: &[i64],
    canonical_answers: &[Option<Choice>],
    order: &[i64],
) -> Vec<Option<Choice>> {
    order
        .iter()
        .map(|id| {
            let index = canonical_ids.iter().position(|c| c == id).unwrap();
            canonical_answers[index]
        })
        .collect()
}

#[tokio::test]
async fn end_to_end_scenario() {
    // Student completes (group 1, order 1) with one wrong answer:
    // score 4/5, successor unlocks, review exam holds only question 3.
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam1 = seed_exam(&pool, teacher, 1, 1, &[A, B, A, D, A]).await;
    let exam2 = seed_exam(&pool, teacher, 1, 2, &[A, A]).await;

    let started = progression::start_exam(&pool, student, exam1).await.unwrap();
    assert_eq!(started.status, ProgressStatus::InProgress);
    assert_eq!(started.questions.len(), 5);

    let answers = vec![Some(A), Some(B), Some(C), Some(D), Some(A)];
    let outcome = progression::submit_exam(&pool, &events, student, exam1, &answers)
        .await
        .unwrap();

    assert_eq!(outcome.summary.score, 4);
    assert_eq!(outcome.summary.wrong_answers, 1);
    assert_eq!(outcome.summary.unanswered, 0);
    assert_eq!(outcome.summary.percentage, 80.00);
    assert_eq!(
        outcome.summary.correct_answers + outcome.summary.wrong_answers
            + outcome.summary.unanswered,
        outcome.summary.total_questions
    );

    // Successor unlocked by the cascade.
    assert_eq!(status_of(&pool, student, exam2).await, ProgressStatus::Unlocked);

    // Review exam exists and contains only the missed question (position 3).
    let review_id = outcome.review_exam_id.expect("review exam should exist");
    let review_questions = review::fetch_review_questions(&pool, review_id)
        .await
        .unwrap();
    assert_eq!(review_questions.len(), 1);
    assert_eq!(review_questions[0].position, 3);
}

#[tokio::test]
async fn resubmission_is_rejected_and_result_stands() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam = seed_exam(&pool, teacher, 1, 1, &[A, B]).await;

    let first = progression::submit_exam(&pool, &events, student, exam, &[Some(A), Some(B)])
        .await
        .unwrap();
    assert_eq!(first.summary.percentage, 100.0);

    let second =
        progression::submit_exam(&pool, &events, student, exam, &[Some(C), Some(C)]).await;
    assert!(matches!(second, Err(AppError::AlreadyCompleted(_))));

    let progress = progression::fetch_progress(&pool, student, exam)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(progress.score, Some(2));
    assert_eq!(progress.percentage, Some(100.0));
}

#[tokio::test]
async fn locked_exam_refuses_start_and_submit() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    // Group 3 is not default-open.
    let exam = seed_exam(&pool, teacher, 3, 1, &[Choice::A]).await;

    let start = progression::start_exam(&pool, student, exam).await;
    assert!(matches!(start, Err(AppError::AccessDenied(_))));

    let submit = progression::submit_exam(&pool, &events, student, exam, &[Some(Choice::A)]).await;
    assert!(matches!(submit, Err(AppError::AccessDenied(_))));

    // Nothing was written.
    assert!(
        progression::fetch_progress(&pool, student, exam)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn cascade_unlocks_explicitly_locked_successor() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam1 = seed_exam(&pool, teacher, 2, 1, &[A]).await;
    let exam2 = seed_exam(&pool, teacher, 2, 2, &[A]).await;

    // Open the first exam of the non-default group, and pin the successor
    // locked with an explicit row.
    let e1 = progression::fetch_exam(&pool, exam1).await.unwrap();
    let e2 = progression::fetch_exam(&pool, exam2).await.unwrap();
    progression::apply_override(&pool, student, &e1, OverrideAction::Open)
        .await
        .unwrap();
    progression::apply_override(&pool, student, &e2, OverrideAction::Close)
        .await
        .unwrap();
    assert_eq!(status_of(&pool, student, exam2).await, ProgressStatus::Locked);

    progression::submit_exam(&pool, &events, student, exam1, &[Some(A)])
        .await
        .unwrap();

    // Completion overrides the explicit lock on the successor.
    assert_eq!(status_of(&pool, student, exam2).await, ProgressStatus::Unlocked);
}

#[tokio::test]
async fn cascade_does_not_regress_in_progress_successor() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam1 = seed_exam(&pool, teacher, 2, 1, &[A]).await;
    let exam2 = seed_exam(&pool, teacher, 2, 2, &[A]).await;

    let e1 = progression::fetch_exam(&pool, exam1).await.unwrap();
    let e2 = progression::fetch_exam(&pool, exam2).await.unwrap();
    progression::apply_override(&pool, student, &e1, OverrideAction::Open)
        .await
        .unwrap();
    progression::apply_override(&pool, student, &e2, OverrideAction::Open)
        .await
        .unwrap();

    // Student is mid-attempt on the successor.
    progression::start_exam(&pool, student, exam2).await.unwrap();
    assert_eq!(
        status_of(&pool, student, exam2).await,
        ProgressStatus::InProgress
    );

    progression::submit_exam(&pool, &events, student, exam1, &[Some(A)])
        .await
        .unwrap();

    assert_eq!(
        status_of(&pool, student, exam2).await,
        ProgressStatus::InProgress
    );
}

#[tokio::test]
async fn perfect_score_has_no_review_exam() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam = seed_exam(&pool, teacher, 1, 1, &[A, B, C]).await;

    let outcome =
        progression::submit_exam(&pool, &events, student, exam, &[Some(A), Some(B), Some(C)])
            .await
            .unwrap();

    assert_eq!(outcome.summary.percentage, 100.0);
    assert!(outcome.review_exam_id.is_none());

    let progress = progression::fetch_progress(&pool, student, exam)
        .await
        .unwrap()
        .unwrap();
    assert!(progress.review_exam_id.is_none());
}

#[tokio::test]
async fn unanswered_questions_feed_the_review_exam() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam = seed_exam(&pool, teacher, 1, 1, &[A, B, C, D]).await;

    // One wrong (pos 2), one unanswered (pos 4).
    let outcome = progression::submit_exam(
        &pool,
        &events,
        student,
        exam,
        &[Some(A), Some(C), Some(C), None],
    )
    .await
    .unwrap();

    assert_eq!(outcome.summary.unanswered, 1);
    let review_id = outcome.review_exam_id.unwrap();
    let questions = review::fetch_review_questions(&pool, review_id).await.unwrap();
    let positions: Vec<i64> = questions.iter().map(|q| q.position).collect();
    assert_eq!(positions, vec![2, 4]);
}

#[tokio::test]
async fn review_best_percentage_is_monotone() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam = seed_exam(&pool, teacher, 1, 1, &[A, A, A, A, A]).await;

    // Miss everything so the review exam carries all five questions.
    let outcome = progression::submit_exam(
        &pool,
        &events,
        student,
        exam,
        &[Some(B), Some(B), Some(B), Some(B), Some(B)],
    )
    .await
    .unwrap();
    let review_id = outcome.review_exam_id.unwrap();

    let canonical = review::fetch_review_questions(&pool, review_id).await.unwrap();
    let ids: Vec<i64> = canonical.iter().map(|q| q.id).collect();

    // Attempt 1: 2/5 correct = 40%.
    let (attempt, _) = review::start_attempt(&pool, student, review_id).await.unwrap();
    let canonical_answers = vec![Some(A), Some(A), Some(B), Some(B), Some(B)];
    let result = review::grade_attempt(
        &pool,
        student,
        review_id,
        &present(&ids, &canonical_answers, &attempt.presentation_order),
        &attempt.presentation_order,
    )
    .await
    .unwrap();
    assert_eq!(result.summary.percentage, 40.0);
    assert_eq!(result.best_percentage, 40.0);
    assert_eq!(result.total_attempts, 1);

    // Attempt 2: 1/5 correct = 20% — best stays at 40.
    let (attempt, _) = review::start_attempt(&pool, student, review_id).await.unwrap();
    let canonical_answers = vec![Some(A), None, Some(B), Some(B), Some(B)];
    let result = review::grade_attempt(
        &pool,
        student,
        review_id,
        &present(&ids, &canonical_answers, &attempt.presentation_order),
        &attempt.presentation_order,
    )
    .await
    .unwrap();
    assert_eq!(result.summary.percentage, 20.0);
    assert_eq!(result.best_percentage, 40.0);
    assert_eq!(result.total_attempts, 2);

    // Attempt 3: 4/5 correct = 80% — best moves up.
    let (attempt, _) = review::start_attempt(&pool, student, review_id).await.unwrap();
    let canonical_answers = vec![Some(A), Some(A), Some(A), Some(A), Some(B)];
    let result = review::grade_attempt(
        &pool,
        student,
        review_id,
        &present(&ids, &canonical_answers, &attempt.presentation_order),
        &attempt.presentation_order,
    )
    .await
    .unwrap();
    assert_eq!(result.summary.percentage, 80.0);
    assert_eq!(result.best_percentage, 80.0);
    assert_eq!(result.total_attempts, 3);

    // The owning progress record mirrors the best score, and the original
    // result is untouched.
    let progress = progression::fetch_progress(&pool, student, exam)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.best_review_score, Some(80.0));
    assert_eq!(progress.percentage, Some(0.0));
    assert_eq!(progress.status, ProgressStatus::Completed);
}

#[tokio::test]
async fn review_attempts_reshuffle_between_attempts() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam = seed_exam(&pool, teacher, 1, 1, &[A, A, A, A, A, A, A, A]).await;
    let outcome = progression::submit_exam(
        &pool,
        &events,
        student,
        exam,
        &vec![Some(B); 8],
    )
    .await
    .unwrap();
    let review_id = outcome.review_exam_id.unwrap();

    let (first, _) = review::start_attempt(&pool, student, review_id).await.unwrap();
    let (second, _) = review::start_attempt(&pool, student, review_id).await.unwrap();
    assert_ne!(first.presentation_order, second.presentation_order);

    // Both are permutations of the same question set.
    let mut a = first.presentation_order.clone();
    let mut b = second.presentation_order.clone();
    a.sort_unstable();
    b.sort_unstable();
    assert_eq!(a, b);
}

#[tokio::test]
async fn group_status_is_derived_from_member_exams() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    seed_exam(&pool, teacher, 5, 1, &[A]).await;
    seed_exam(&pool, teacher, 5, 2, &[A]).await;
    let exam3 = seed_exam(&pool, teacher, 5, 3, &[A]).await;

    // All locked so far.
    assert_eq!(
        access::group_status(&pool, student, 5).await.unwrap(),
        access::GroupStatus::Locked
    );

    // One completed member is enough to report the group unlocked, even
    // with the rest locked.
    let e3 = progression::fetch_exam(&pool, exam3).await.unwrap();
    progression::apply_override(&pool, student, &e3, OverrideAction::Open)
        .await
        .unwrap();
    progression::submit_exam(&pool, &events, student, exam3, &[Some(A)])
        .await
        .unwrap();

    assert_eq!(
        access::group_status(&pool, student, 5).await.unwrap(),
        access::GroupStatus::Unlocked
    );
}

#[tokio::test]
async fn cumulative_percentage_is_question_weighted() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    // 10-question exam, 8 correct; 20-question exam, 15 correct.
    let exam1 = seed_exam(&pool, teacher, 4, 1, &vec![A; 10]).await;
    let exam2 = seed_exam(&pool, teacher, 4, 2, &vec![A; 20]).await;

    let e1 = progression::fetch_exam(&pool, exam1).await.unwrap();
    progression::apply_override(&pool, student, &e1, OverrideAction::Open)
        .await
        .unwrap();

    let mut answers1 = vec![Some(A); 8];
    answers1.extend([Some(B), Some(B)]);
    progression::submit_exam(&pool, &events, student, exam1, &answers1)
        .await
        .unwrap();

    // exam2 was unlocked by the cascade.
    let mut answers2 = vec![Some(A); 15];
    answers2.extend(vec![Some(B); 5]);
    progression::submit_exam(&pool, &events, student, exam2, &answers2)
        .await
        .unwrap();

    // 23/30 weighted = 76.67, not the 77.5 simple mean of 80 and 75.
    let cumulative = access::cumulative_percentage(&pool, student, 4)
        .await
        .unwrap();
    assert_eq!(cumulative, Some(76.67));
}

#[tokio::test]
async fn group_toggle_reports_per_exam_outcomes() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam1 = seed_exam(&pool, teacher, 7, 1, &[A]).await;
    let exam2 = seed_exam(&pool, teacher, 7, 2, &[A]).await;
    seed_exam(&pool, teacher, 7, 3, &[A]).await;

    // Complete exam 1, leave exam 2 in progress, exam 3 untouched.
    let e1 = progression::fetch_exam(&pool, exam1).await.unwrap();
    progression::apply_override(&pool, student, &e1, OverrideAction::Open)
        .await
        .unwrap();
    progression::submit_exam(&pool, &events, student, exam1, &[Some(A)])
        .await
        .unwrap();
    progression::start_exam(&pool, student, exam2).await.unwrap();

    let outcomes = access::toggle_group(&pool, student, 7, OverrideAction::Close)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(!outcomes[0].applied);
    assert_eq!(outcomes[0].status, ProgressStatus::Completed);
    assert!(!outcomes[1].applied);
    assert_eq!(outcomes[1].status, ProgressStatus::InProgress);
    assert!(outcomes[2].applied);
    assert_eq!(outcomes[2].status, ProgressStatus::Locked);
}

#[tokio::test]
async fn submit_emits_exam_submitted_event() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    let mut rx = events.subscribe_teachers();

    use Choice::*;
    let exam = seed_exam(&pool, teacher, 1, 1, &[A, B]).await;
    progression::submit_exam(&pool, &events, student, exam, &[Some(A), Some(C)])
        .await
        .unwrap();

    match rx.recv().await.unwrap() {
        DomainEvent::ExamSubmitted {
            student_id,
            exam_id,
            percentage,
        } => {
            assert_eq!(student_id, student);
            assert_eq!(exam_id, exam);
            assert_eq!(percentage, 50.0);
        }
        other => panic!("Unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn invalid_submission_leaves_state_untouched() {
    let pool = test_pool().await;
    let events = EventHub::new();
    let teacher = seed_user(&pool, "teacher").await;
    let student = seed_user(&pool, "student").await;

    use Choice::*;
    let exam = seed_exam(&pool, teacher, 1, 1, &[A, B, C]).await;
    progression::start_exam(&pool, student, exam).await.unwrap();

    // Wrong answer count: rejected before any write.
    let result = progression::submit_exam(&pool, &events, student, exam, &[Some(A)]).await;
    assert!(matches!(result, Err(AppError::InvalidSubmission(_))));

    let progress = progression::fetch_progress(&pool, student, exam)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, ProgressStatus::InProgress);
    assert!(progress.score.is_none());
}
