// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Canonical form of an answer set.
//
// Map keys are sorted by construction (BTreeMap) and multi-select answers are
// sets, so the only normalisation left to do is trimming text answers.
// Question ids are kept byte for byte: trimming them could fold two distinct
// keys into one and drop an answer. The canonical JSON string is the hashing
// input and the sealed payload everywhere.

use examseal_core::error::Result;
use examseal_core::types::{Answer, AnswerEntry, AnswersMap};
use examseal_security::hash_bytes;

/// Normalise an answer set. Idempotent.
pub fn canonicalize(answers: &AnswersMap) -> AnswersMap {
    answers
        .iter()
        .map(|(question_id, entry)| {
            let entry = AnswerEntry {
                question_id: question_id.clone(),
                answer: canonical_answer(&entry.answer),
                time_spent: entry.time_spent,
            };
            (question_id.clone(), entry)
        })
        .collect()
}

fn canonical_answer(answer: &Answer) -> Answer {
    match answer {
        Answer::Text(text) => Answer::Text(text.trim().to_owned()),
        other => other.clone(),
    }
}

/// JSON text of the canonical form.
pub fn canonical_string(answers: &AnswersMap) -> Result<String> {
    Ok(serde_json::to_string(&canonicalize(answers))?)
}

/// SHA-256 hex of [`canonical_string`].
pub fn answers_hash(answers: &AnswersMap) -> Result<String> {
    Ok(hash_bytes(canonical_string(answers)?.as_bytes()))
}

/// Whether two answer sets hold the same answers, ignoring time spent.
pub fn same_answers(a: &AnswersMap, b: &AnswersMap) -> bool {
    let (a, b) = (canonicalize(a), canonicalize(b));
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|((qa, ea), (qb, eb))| qa == qb && ea.answer == eb.answer)
}
