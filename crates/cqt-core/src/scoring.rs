//! Grading and score reports
//!
//! Grading is exact. Numerical answers are compared as trimmed strings, so
//! "5.0" does not match "5". Choice questions need exactly the correct set
//! of options: no partial credit, supersets and subsets are wrong.

use serde::Serialize;

use crate::payload::{Payload, Question, QuestionType};
use crate::response::{is_answered, Response};
use crate::{PackageError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
}

/// Grade one response against its question's answer key
///
/// A missing or empty response is always incorrect, and so is any
/// response to a question whose answer key is empty.
pub fn grade(question: &Question, response: Option<&Response>) -> Verdict {
    if !is_answered(question, response) {
        return Verdict::Incorrect;
    }
    let Some(answer) = response.map(Response::answer) else {
        return Verdict::Incorrect;
    };

    let correct = match question.question_type {
        QuestionType::Numerical => {
            let expected = question.numerical_answer.trim();
            !expected.is_empty() && answer.as_text() == expected
        }
        QuestionType::McqSingle | QuestionType::McqMultiple => {
            let expected = question.correct_option_set();
            !expected.is_empty() && answer.selected_options() == expected
        }
    };

    if correct {
        Verdict::Correct
    } else {
        Verdict::Incorrect
    }
}

/// Per-question result as shown in a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Incorrect,
    Unanswered,
}

/// Marks awarded per outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarkingScheme {
    pub correct: i64,
    pub incorrect: i64,
    pub unanswered: i64,
}

impl Default for MarkingScheme {
    fn default() -> Self {
        Self {
            correct: 4,
            incorrect: -1,
            unanswered: 0,
        }
    }
}

impl MarkingScheme {
    pub fn marks(&self, outcome: Outcome) -> i64 {
        match outcome {
            Outcome::Correct => self.correct,
            Outcome::Incorrect => self.incorrect,
            Outcome::Unanswered => self.unanswered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionResult {
    pub index: usize,
    pub key: String,
    pub question_type: QuestionType,
    pub outcome: Outcome,
    pub marks: i64,
}

/// Totals for an evaluated package
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub total: usize,
    pub answered: usize,
    pub correct: usize,
    pub wrong: usize,
    pub unanswered: usize,
    pub score: i64,
    /// Share of questions answered correctly, 0-100
    pub percent: f64,
    pub questions: Vec<QuestionResult>,
}

impl ScoreReport {
    /// Score every question; only available once the package is evaluated
    pub fn compute(payload: &Payload, scheme: &MarkingScheme) -> Result<Self> {
        if !payload.is_evaluated() {
            return Err(PackageError::NotEvaluated);
        }

        let mut report = ScoreReport {
            total: payload.questions().len(),
            answered: 0,
            correct: 0,
            wrong: 0,
            unanswered: 0,
            score: 0,
            percent: 0.0,
            questions: Vec::with_capacity(payload.questions().len()),
        };

        for ((index, question), key) in payload
            .questions()
            .iter()
            .enumerate()
            .zip(payload.response_keys())
        {
            let response = payload.response(key.as_str());
            let outcome = if !is_answered(question, response) {
                report.unanswered += 1;
                Outcome::Unanswered
            } else {
                report.answered += 1;
                match grade(question, response) {
                    Verdict::Correct => {
                        report.correct += 1;
                        Outcome::Correct
                    }
                    Verdict::Incorrect => {
                        report.wrong += 1;
                        Outcome::Incorrect
                    }
                }
            };
            let marks = scheme.marks(outcome);
            report.score += marks;
            report.questions.push(QuestionResult {
                index,
                key: key.to_string(),
                question_type: question.question_type,
                outcome,
                marks,
            });
        }

        if report.total > 0 {
            report.percent = report.correct as f64 / report.total as f64 * 100.0;
        }
        Ok(report)
    }
}

/// Answer progress, available before evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub answered: usize,
    pub marked: usize,
}

impl Payload {
    pub fn progress(&self) -> Progress {
        let keys = self.response_keys();
        let answered = self
            .questions()
            .iter()
            .zip(&keys)
            .filter(|(q, key)| is_answered(q, self.response(key.as_str())))
            .count();
        let marked = keys.iter().filter(|key| self.is_marked(key.as_str())).count();
        Progress {
            total: self.questions().len(),
            answered,
            marked,
        }
    }

    /// Score report under the default marking scheme
    pub fn report(&self) -> Result<ScoreReport> {
        ScoreReport::compute(self, &MarkingScheme::default())
    }
}
