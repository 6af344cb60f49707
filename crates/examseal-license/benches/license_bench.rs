// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for license issuance and offline verification.

use chrono::{Duration, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use examseal_core::types::License;
use examseal_license::content::{new_exam_content_key, seal_content};
use examseal_license::{ClientVerifier, LicenseIssuer};
use examseal_security::KeyMaterial;

fn bench_issue_and_verify(c: &mut Criterion) {
    let keys = KeyMaterial::generate(2048).expect("generate key pair");
    let issuer = LicenseIssuer::new(&keys);
    let verifier = ClientVerifier::from_client_config(&keys.client_config()).expect("verifier");

    let t0 = Utc::now();
    let content_key = new_exam_content_key().expect("content key");
    let license = License {
        exam_id: "EXAM-2026-01".into(),
        exam_content_key: content_key.clone(),
        exam_code: "CS101".into(),
        exam_title: "Introduction to Computing".into(),
        start_time: t0,
        end_time: t0 + Duration::hours(2),
        issued_at: t0,
        user_id: "student-0042".into(),
    };
    let questions: Vec<_> = (0..50)
        .map(|i| json!({"id": format!("q{i}"), "text": "Which of these is prime?", "options": [4, 6, 7, 9]}))
        .collect();
    let content = seal_content(&json!({ "questions": questions }), &content_key).expect("seal");

    c.bench_function("license_issue", |b| {
        b.iter(|| black_box(issuer.issue(black_box(&license)).expect("issue failed")));
    });

    let wire = issuer.issue(&license).expect("issue").to_wire();
    let at = t0 + Duration::minutes(10);
    c.bench_function("license_verify_and_open (50 questions)", |b| {
        b.iter(|| {
            let opened = verifier
                .verify_and_open_at(black_box(&wire), &content, Some("student-0042"), at)
                .expect("verify failed");
            black_box(opened);
        });
    });
}

criterion_group!(benches, bench_issue_and_verify);
criterion_main!(benches);
