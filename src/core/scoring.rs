// src/core/scoring.rs

use serde::Serialize;

use crate::{
    error::AppError,
    models::question::{Choice, Question},
};

/// Outcome of one graded question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Correct,
    Wrong,
    /// No selection was made. Never counted as wrong, but still picked up
    /// by review-exam generation.
    Unanswered,
}

/// Per-question grading detail, in canonical exam order.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub question_id: i64,
    pub position: i64,
    pub selected: Option<Choice>,
    pub correct_answer: Choice,
    pub outcome: AnswerOutcome,
    pub explanation: Option<String>,
}

/// Aggregate result of grading one submission.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub score: i64,
    pub total_questions: i64,
    pub percentage: f64,
    pub correct_answers: i64,
    pub wrong_answers: i64,
    pub unanswered: i64,
    pub detail: Vec<QuestionResult>,
}

/// Rounds to two decimal places, the precision all percentages are reported
/// at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Grades a submission against an exam's question set.
///
/// Pure and deterministic: identical inputs always produce identical
/// output, which review-attempt comparisons rely on. Time is never
/// consulted; a timeout submission looks like any other submission with
/// fewer answers.
///
/// * One answer slot per question, in canonical order; `None` counts as
///   unanswered, never as wrong.
/// * A length mismatch is a caller error and nothing is graded.
/// * An empty question set is a configuration defect, not a 0% result.
pub fn grade(
    questions: &[Question],
    answers: &[Option<Choice>],
) -> Result<ResultSummary, AppError> {
    if questions.is_empty() {
        return Err(AppError::ConfigurationError(
            "Cannot grade an exam with zero questions".to_string(),
        ));
    }

    if answers.len() != questions.len() {
        return Err(AppError::InvalidSubmission(format!(
            "Expected {} answers, got {}",
            questions.len(),
            answers.len()
        )));
    }

    let mut correct_answers = 0i64;
    let mut wrong_answers = 0i64;
    let mut unanswered = 0i64;

    let detail: Vec<QuestionResult> = questions
        .iter()
        .zip(answers.iter())
        .map(|(question, selected)| {
            let outcome = match selected {
                Some(choice) if *choice == question.correct_answer => {
                    correct_answers += 1;
                    AnswerOutcome::Correct
                }
                Some(_) => {
                    wrong_answers += 1;
                    AnswerOutcome::Wrong
                }
                None => {
                    unanswered += 1;
                    AnswerOutcome::Unanswered
                }
            };

            QuestionResult {
                question_id: question.id,
                position: question.position,
                selected: *selected,
                correct_answer: question.correct_answer,
                outcome,
                explanation: question.explanation.clone(),
            }
        })
        .collect();

    let total_questions = questions.len() as i64;
    let percentage = round2(100.0 * correct_answers as f64 / total_questions as f64);

    Ok(ResultSummary {
        score: correct_answers,
        total_questions,
        percentage,
        correct_answers,
        wrong_answers,
        unanswered,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: i64, position: i64, correct: Choice) -> Question {
        Question {
            id,
            exam_id: 1,
            position,
            image_ref: format!("q{}.png", id),
            correct_answer: correct,
            explanation: None,
        }
    }

    #[test]
    fn test_grade_perfect() {
        let questions = vec![question(1, 1, Choice::A), question(2, 2, Choice::B)];
        let answers = vec![Some(Choice::A), Some(Choice::B)];

        let summary = grade(&questions, &answers).unwrap();
        assert_eq!(summary.score, 2);
        assert_eq!(summary.percentage, 100.0);
        assert_eq!(summary.wrong_answers, 0);
        assert_eq!(summary.unanswered, 0);
    }

    #[test]
    fn test_grade_counts_are_conserved() {
        let questions = vec![
            question(1, 1, Choice::A),
            question(2, 2, Choice::B),
            question(3, 3, Choice::C),
        ];
        let answers = vec![Some(Choice::A), Some(Choice::D), None];

        let summary = grade(&questions, &answers).unwrap();
        assert_eq!(summary.correct_answers, 1);
        assert_eq!(summary.wrong_answers, 1);
        assert_eq!(summary.unanswered, 1);
        assert_eq!(
            summary.correct_answers + summary.wrong_answers + summary.unanswered,
            summary.total_questions
        );
    }

    #[test]
    fn test_unanswered_is_not_wrong() {
        let questions = vec![question(1, 1, Choice::A)];
        let answers = vec![None];

        let summary = grade(&questions, &answers).unwrap();
        assert_eq!(summary.wrong_answers, 0);
        assert_eq!(summary.unanswered, 1);
        assert_eq!(summary.detail[0].outcome, AnswerOutcome::Unanswered);
    }

    #[test]
    fn test_percentage_rounding() {
        // 1/3 correct => 33.33, not 33.333...
        let questions = vec![
            question(1, 1, Choice::A),
            question(2, 2, Choice::A),
            question(3, 3, Choice::A),
        ];
        let answers = vec![Some(Choice::A), Some(Choice::B), Some(Choice::B)];

        let summary = grade(&questions, &answers).unwrap();
        assert_eq!(summary.percentage, 33.33);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let questions = vec![question(1, 1, Choice::A), question(2, 2, Choice::B)];
        let answers = vec![Some(Choice::A)];

        let err = grade(&questions, &answers).unwrap_err();
        assert!(matches!(err, AppError::InvalidSubmission(_)));
    }

    #[test]
    fn test_zero_questions_rejected() {
        let err = grade(&[], &[]).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationError(_)));
    }

    #[test]
    fn test_grading_is_deterministic() {
        let questions = vec![
            question(1, 1, Choice::A),
            question(2, 2, Choice::C),
            question(3, 3, Choice::D),
        ];
        let answers = vec![Some(Choice::A), None, Some(Choice::B)];

        let first = grade(&questions, &answers).unwrap();
        let second = grade(&questions, &answers).unwrap();
        assert_eq!(first.score, second.score);
        assert_eq!(first.percentage, second.percentage);
        assert_eq!(first.unanswered, second.unanswered);
    }
}
