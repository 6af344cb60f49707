// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pluggable scoring of the final answer set.

use std::collections::BTreeMap;

use examseal_core::types::{Answer, AnswersMap, ScoreReport};

use crate::canonical::canonicalize;

/// Turns a merged answer set into a score.
pub trait ScoringStrategy {
    fn score(&self, exam_id: &str, answers: &AnswersMap) -> ScoreReport;
}

/// Counts every answered question as correct. The default until an exam
/// provides its own strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsweredCountsAsCorrect;

impl ScoringStrategy for AnsweredCountsAsCorrect {
    fn score(&self, _exam_id: &str, answers: &AnswersMap) -> ScoreReport {
        let total = answers.len() as u32;
        let correct = answers.values().filter(|e| is_answered(&e.answer)).count() as u32;
        report(correct, total)
    }
}

/// Compares canonical answers against a fixed key. Questions missing from
/// the answer set count as wrong.
#[derive(Debug, Clone, Default)]
pub struct AnswerKeyScoring {
    key: BTreeMap<String, Answer>,
}

impl AnswerKeyScoring {
    /// Build from `(question_id, correct answer)` pairs.
    pub fn new(key: impl IntoIterator<Item = (String, Answer)>) -> Self {
        Self {
            key: key.into_iter().collect(),
        }
    }
}

impl ScoringStrategy for AnswerKeyScoring {
    fn score(&self, _exam_id: &str, answers: &AnswersMap) -> ScoreReport {
        let answers = canonicalize(answers);
        let correct = self
            .key
            .iter()
            .filter(|(question, expected)| {
                let expected = match expected {
                    Answer::Text(text) => Answer::Text(text.trim().to_owned()),
                    other => (*other).clone(),
                };
                answers.get(*question).is_some_and(|e| e.answer == expected)
            })
            .count() as u32;
        report(correct, self.key.len() as u32)
    }
}

fn is_answered(answer: &Answer) -> bool {
    match answer {
        Answer::SingleChoice(_) => true,
        Answer::MultiChoice(ids) => !ids.is_empty(),
        Answer::Text(text) => !text.trim().is_empty(),
    }
}

fn report(correct: u32, total: u32) -> ScoreReport {
    let score = if total == 0 {
        0.0
    } else {
        f64::from(correct) * 100.0 / f64::from(total)
    };
    ScoreReport {
        correct,
        total,
        score,
    }
}
