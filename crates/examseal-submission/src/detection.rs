// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cheat detection over the decrypted snapshot series of one session.
//
// The series arrives in upload order (by `savedAt`). Every heuristic runs
// over consecutive pairs of that series using the sealing timestamps found
// inside the packages, so a client that rewrites its clock shows up as time
// running backwards.

use chrono::{DateTime, Utc};
use examseal_core::config::DetectionThresholds;
use examseal_core::types::{AnomalyKind, CheatDetectionResult, SealedAnswers};
use examseal_security::verify_hash;
use tracing::debug;

use crate::canonical::{canonical_string, canonicalize, same_answers};

/// One successfully decrypted package.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub submission_id: String,
    /// Position of the package in the uploaded batch.
    pub upload_index: usize,
    pub saved_at: DateTime<Utc>,
    pub sealed: SealedAnswers,
}

impl Snapshot {
    /// Sealing timestamp taken from inside the encrypted payload.
    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.sealed.sealing_timestamp
    }
}

/// A fired heuristic with a short human-readable context.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub kind: AnomalyKind,
    pub context: String,
}

/// Run every heuristic and fold the findings into a weighted result.
pub fn detect(series: &[Snapshot], thresholds: &DetectionThresholds) -> CheatDetectionResult {
    let findings = findings(series, thresholds);
    for finding in &findings {
        debug!(anomaly = %finding.kind, context = %finding.context, "anomaly");
    }
    CheatDetectionResult::from_anomalies(findings.into_iter().map(|f| f.kind))
}

/// All findings, in series order. A heuristic may fire more than once.
pub fn findings(series: &[Snapshot], thresholds: &DetectionThresholds) -> Vec<Finding> {
    let mut out = Vec::new();

    for snapshot in series {
        if let Some(finding) = hash_mismatch(snapshot) {
            out.push(finding);
        }
    }

    let mut late_intervals = 0usize;
    let mut unchanged_run = 0usize;
    let mut unchanged_flagged = false;

    for pair in series.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let delta = (next.sealed_at() - prev.sealed_at()).num_seconds();

        if delta < 0 {
            out.push(Finding {
                kind: AnomalyKind::TimestampManipulation,
                context: format!(
                    "{} sealed {}s before its predecessor {}",
                    next.submission_id, -delta, prev.submission_id
                ),
            });
        }

        if delta > thresholds.idle_gap_secs {
            out.push(Finding {
                kind: AnomalyKind::LongIdleGap,
                context: format!("{delta}s without a save before {}", next.submission_id),
            });
        }

        if delta > thresholds.late_interval_secs {
            late_intervals += 1;
        }

        let fraction = changed_fraction(&prev.sealed, &next.sealed);
        if fraction > thresholds.mass_change_fraction {
            out.push(Finding {
                kind: AnomalyKind::MassAnswerChange,
                context: format!("{:.0}% of answers changed in {}", fraction * 100.0, next.submission_id),
            });
            if delta.abs() < thresholds.short_window_secs {
                out.push(Finding {
                    kind: AnomalyKind::MassChangeInShortTime,
                    context: format!("mass change within {}s", delta.abs()),
                });
            }
        }

        if same_answers(&prev.sealed.answers, &next.sealed.answers) {
            unchanged_run += 1;
            if unchanged_run > thresholds.max_unchanged_run && !unchanged_flagged {
                unchanged_flagged = true;
                out.push(Finding {
                    kind: AnomalyKind::RepeatedUnchangedSaves,
                    context: format!("{unchanged_run} consecutive saves without changes"),
                });
            }
        } else {
            unchanged_run = 0;
        }
    }

    let intervals = series.len().saturating_sub(1);
    if intervals >= thresholds.min_cadence_intervals && intervals > 0 {
        let late = late_intervals as f64 / intervals as f64;
        if late > thresholds.irregular_fraction {
            out.push(Finding {
                kind: AnomalyKind::IrregularAutosaveIntervals,
                context: format!(
                    "{late_intervals}/{intervals} intervals over {}s (autosave every {}s)",
                    thresholds.late_interval_secs, thresholds.autosave_period_secs
                ),
            });
        }
    }

    out
}

fn hash_mismatch(snapshot: &Snapshot) -> Option<Finding> {
    let checked = canonical_string(&snapshot.sealed.answers).and_then(|canonical| {
        verify_hash(canonical.as_bytes(), &snapshot.sealed.final_answers_hash)
    });
    checked.err().map(|e| Finding {
        kind: AnomalyKind::AnswerHashMismatch,
        context: format!("{}: {e}", snapshot.submission_id),
    })
}

/// Fraction of questions (union of both snapshots) whose answer differs.
pub fn changed_fraction(prev: &SealedAnswers, next: &SealedAnswers) -> f64 {
    let (prev, next) = (canonicalize(&prev.answers), canonicalize(&next.answers));
    let mut questions: Vec<&String> = prev.keys().chain(next.keys()).collect();
    questions.sort();
    questions.dedup();
    if questions.is_empty() {
        return 0.0;
    }

    let changed = questions
        .iter()
        .filter(|q| prev.get(**q).map(|e| &e.answer) != next.get(**q).map(|e| &e.answer))
        .count();
    changed as f64 / questions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use examseal_core::types::{Answer, AnswerEntry, AnswersMap};

    use crate::canonical::answers_hash;

    fn answers(values: &[(&str, u32)]) -> AnswersMap {
        values
            .iter()
            .map(|(q, a)| ((*q).to_owned(), AnswerEntry::new(*q, Answer::SingleChoice(*a), 10)))
            .collect()
    }

    fn snapshot(id: &str, at: DateTime<Utc>, values: &[(&str, u32)]) -> Snapshot {
        let answers = answers(values);
        Snapshot {
            submission_id: id.into(),
            upload_index: 0,
            saved_at: at,
            sealed: SealedAnswers {
                final_answers_hash: answers_hash(&answers).unwrap(),
                answers,
                sealing_timestamp: at,
            },
        }
    }

    const FIVE: [(&str, u32); 5] = [("q1", 1), ("q2", 1), ("q3", 1), ("q4", 1), ("q5", 1)];

    fn detect_default(series: &[Snapshot]) -> CheatDetectionResult {
        detect(series, &DetectionThresholds::default())
    }

    #[test]
    fn clean_session_has_no_anomalies() {
        let t0 = Utc::now();
        let series: Vec<_> = (0..6)
            .map(|i| {
                let mut values = FIVE.to_vec();
                values[i % 5].1 = i as u32 + 2;
                snapshot(&format!("s{i}"), t0 + Duration::seconds(30 * i as i64), &values)
            })
            .collect();
        assert_eq!(detect_default(&series), CheatDetectionResult::default());
    }

    #[test]
    fn mass_late_change_scores_thirty_five() {
        let t0 = Utc::now();
        let series = [
            snapshot("a", t0, &FIVE),
            snapshot(
                "b",
                t0 + Duration::seconds(90),
                &[("q1", 2), ("q2", 2), ("q3", 2), ("q4", 2), ("q5", 1)],
            ),
        ];
        let result = detect_default(&series);
        assert_eq!(result.suspicious_level, 35);
        assert!(result.detected_anomalies.contains(&AnomalyKind::MassAnswerChange));
        assert!(result.detected_anomalies.contains(&AnomalyKind::MassChangeInShortTime));
    }

    #[test]
    fn slow_mass_change_is_not_short() {
        let t0 = Utc::now();
        let series = [
            snapshot("a", t0, &FIVE),
            snapshot("b", t0 + Duration::minutes(10), &[("q1", 9), ("q2", 9), ("q3", 9)]),
        ];
        let result = detect_default(&series);
        assert_eq!(
            result.detected_anomalies.into_iter().collect::<Vec<_>>(),
            vec![AnomalyKind::MassAnswerChange]
        );
    }

    #[test]
    fn tampered_hash_is_flagged() {
        let mut s = snapshot("a", Utc::now(), &FIVE);
        s.sealed.final_answers_hash = "0".repeat(64);
        let result = detect_default(&[s]);
        assert_eq!(result.suspicious_level, 30);
        assert!(result.detected_anomalies.contains(&AnomalyKind::AnswerHashMismatch));
    }

    #[test]
    fn clock_running_backwards_is_flagged() {
        let t0 = Utc::now();
        let mut late = snapshot("b", t0 + Duration::seconds(30), &FIVE);
        late.sealed.sealing_timestamp = t0 - Duration::seconds(60);
        let result = detect_default(&[snapshot("a", t0, &FIVE), late]);
        assert!(result.detected_anomalies.contains(&AnomalyKind::TimestampManipulation));
    }

    #[test]
    fn long_idle_gap_is_flagged() {
        let t0 = Utc::now();
        let mut second = FIVE.to_vec();
        second[0].1 = 3;
        let result = detect_default(&[
            snapshot("a", t0, &FIVE),
            snapshot("b", t0 + Duration::minutes(31), &second),
        ]);
        assert_eq!(
            result.detected_anomalies.into_iter().collect::<Vec<_>>(),
            vec![AnomalyKind::LongIdleGap]
        );
    }

    #[test]
    fn irregular_cadence_needs_enough_intervals() {
        let t0 = Utc::now();
        let offsets = [0, 30, 100, 170];
        let series: Vec<_> = offsets
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut values = FIVE.to_vec();
                values[i].1 = 7;
                snapshot(&format!("s{i}"), t0 + Duration::seconds(*s), &values)
            })
            .collect();
        let result = detect_default(&series);
        assert!(result.detected_anomalies.contains(&AnomalyKind::IrregularAutosaveIntervals));

        let short = detect_default(&series[..2]);
        assert!(!short.detected_anomalies.contains(&AnomalyKind::IrregularAutosaveIntervals));
    }

    #[test]
    fn repeated_unchanged_saves_fire_after_threshold() {
        let t0 = Utc::now();
        let series: Vec<_> = (0..5)
            .map(|i| snapshot(&format!("s{i}"), t0 + Duration::seconds(30 * i), &FIVE))
            .collect();
        let result = detect_default(&series);
        assert_eq!(result.suspicious_level, 5);
        assert!(result.detected_anomalies.contains(&AnomalyKind::RepeatedUnchangedSaves));

        let three = detect_default(&series[..4]);
        assert_eq!(three.suspicious_level, 0);
    }

    #[test]
    fn changed_fraction_counts_added_and_removed_questions() {
        let t0 = Utc::now();
        let a = snapshot("a", t0, &[("q1", 1), ("q2", 1)]);
        let b = snapshot("b", t0, &[("q2", 1), ("q3", 1)]);
        let fraction = changed_fraction(&a.sealed, &b.sealed);
        assert!((fraction - 2.0 / 3.0).abs() < 1e-9);
    }
}
