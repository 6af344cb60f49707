// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// examseal — offline exam licensing and submission reconciliation.
//
// Entry point. Initialises logging, parses the command line and dispatches.
// Server commands (keys, client-config, prefetch, reconcile, audit) load the
// data directory, config and key material exactly once before doing anything.
// Client commands (verify, seal-answers, bundle) only need a client-config
// payload and never touch the server's key store.

mod services;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use examseal_core::disposition::{FailureClass, classify};
use examseal_core::error::{ExamSealError, Result};
use examseal_core::types::{AnswersMap, ClientConfig, PrefetchBundle, SubmissionPackage};
use examseal_license::{ClientVerifier, ExamContent, ExamDescriptor, ValidityWindow};
use examseal_submission::{BatchWriter, SubmissionSealer, read_batch_file};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info};

use services::app_services::ServerServices;
use services::data_dir;

#[derive(Parser)]
#[command(name = "examseal")]
#[command(version)]
#[command(about = "Sealed, signed, time-bound exam licenses and offline answer reconciliation", long_about = None)]
struct Cli {
    /// Data directory (default: $XDG_DATA_HOME/examseal or ~/.local/share/examseal)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the server key pair and license-sealing key
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Print the client configuration payload (public key, license key, OAEP hash)
    ClientConfig {
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Seal exam content and issue a license for one student
    Prefetch {
        #[arg(long)]
        exam_id: String,
        #[arg(long)]
        exam_code: String,
        #[arg(long)]
        exam_title: String,
        #[arg(long)]
        user: String,
        /// JSON file with the exam content
        #[arg(long)]
        content: PathBuf,
        /// Start of the validity window (RFC 3339, default: now)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// End of the validity window (RFC 3339, default: start + configured minutes)
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Verify a prefetch bundle offline and print the opened exam (client side)
    Verify {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        client_config: PathBuf,
        #[arg(long)]
        user: Option<String>,
        /// Verify as of this instant instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Seal an answers snapshot into a submission package (client side)
    SealAnswers {
        #[arg(long)]
        client_config: PathBuf,
        /// JSON file mapping question id to answer entry
        #[arg(long)]
        answers: PathBuf,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Bundle submission packages into a batch archive (client side)
    Bundle {
        #[arg(long)]
        exam_id: String,
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        out: PathBuf,
        /// Submission package JSON files
        #[arg(required = true)]
        packages: Vec<PathBuf>,
    },

    /// Reconcile an uploaded batch archive and store the result
    Reconcile {
        #[arg(long)]
        exam_id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        batch: PathBuf,
        /// Delete the archive once the result is stored
        #[arg(long)]
        remove_batch: bool,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show audit trail entries
    Audit {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Load the key store, generating keys on first run
    Init,
    /// Print the public key and fingerprints
    Show,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeySummary {
    key_dir: PathBuf,
    public_key_fingerprint: String,
    license_key_fingerprint: String,
    public_key: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let disposition = classify(&e);
            error!(class = ?disposition.class, action = ?disposition.action, error = %e, "command failed");
            eprintln!("examseal: {}", disposition.message);
            match disposition.class {
                FailureClass::StartupFatal => ExitCode::from(78),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir.as_deref();
    match cli.command {
        Commands::Keys { action } => {
            let services = server(data_dir)?;
            let keys = services.keys();
            let summary = KeySummary {
                key_dir: services.config().key_store.key_dir.clone(),
                public_key_fingerprint: keys.public_key_fingerprint(),
                license_key_fingerprint: keys.license_sealing_key().fingerprint(),
                public_key: keys.public_key_pem().to_owned(),
            };
            match action {
                KeysAction::Init => {
                    info!(data_dir = %services.data_dir().display(), "key store ready");
                    println!("{}", summary.public_key_fingerprint);
                    Ok(())
                }
                KeysAction::Show => write_json(&summary, None),
            }
        }

        Commands::ClientConfig { out } => {
            let services = server(data_dir)?;
            write_json(&services.client_config(), out.as_deref())
        }

        Commands::Prefetch {
            exam_id,
            exam_code,
            exam_title,
            user,
            content,
            start,
            end,
            out,
        } => {
            let services = server(data_dir)?;
            let content: ExamContent = read_json(&content)?;
            let start = start.unwrap_or_else(Utc::now);
            let window = match end {
                Some(end) => ValidityWindow::new(start, end)?,
                None => services.default_window(start),
            };
            let exam = ExamDescriptor {
                exam_id,
                exam_code,
                exam_title,
            };
            let bundle = services.prefetch(&exam, &content, &user, window)?;
            write_json(&bundle, out.as_deref())
        }

        Commands::Verify {
            bundle,
            client_config,
            user,
            at,
        } => {
            let bundle: PrefetchBundle = read_json(&bundle)?;
            let config: ClientConfig = read_json(&client_config)?;
            let opened = ClientVerifier::from_client_config(&config)?.verify_and_open_at(
                &bundle.signed_license,
                &bundle.encrypted_content,
                user.as_deref(),
                at.unwrap_or_else(Utc::now),
            )?;
            write_json(
                &serde_json::json!({
                    "examId": opened.license.exam_id,
                    "examCode": opened.license.exam_code,
                    "examTitle": opened.license.exam_title,
                    "startDate": opened.license.start_time,
                    "endDate": opened.license.end_time,
                    "userId": opened.license.user_id,
                    "content": opened.content,
                }),
                None,
            )
        }

        Commands::SealAnswers {
            client_config,
            answers,
            session,
            out,
        } => {
            let config: ClientConfig = read_json(&client_config)?;
            let answers: AnswersMap = read_json(&answers)?;
            let mut sealer = SubmissionSealer::from_client_config(&config)?;
            if let Some(session) = session {
                sealer = sealer.with_session(session);
            }
            write_json(&sealer.seal(&answers)?, out.as_deref())
        }

        Commands::Bundle {
            exam_id,
            student_id,
            session,
            out,
            packages,
        } => {
            let mut writer = BatchWriter::new(exam_id, student_id);
            if let Some(session) = session {
                writer = writer.with_session(session);
            }
            for path in &packages {
                let package: SubmissionPackage = read_json(path)?;
                writer.push(package);
            }
            let count = writer.len();
            writer.write_to(&out)?;
            info!(path = %out.display(), packages = count, "batch written");
            Ok(())
        }

        Commands::Reconcile {
            exam_id,
            user,
            batch,
            remove_batch,
            out,
        } => {
            let mut services = server(data_dir)?;
            let archive = read_batch_file(&batch)?;
            let outcome = services.reconcile(&exam_id, &user, &archive)?;
            if remove_batch {
                std::fs::remove_file(&batch)?;
                info!(path = %batch.display(), "batch removed after reconciliation");
            }
            write_json(&outcome, out.as_deref())
        }

        Commands::Audit { subject, limit } => {
            let services = server(data_dir)?;
            write_json(&services.audit_entries(subject.as_deref(), limit)?, None)
        }
    }
}

fn server(data_dir: Option<&Path>) -> Result<ServerServices> {
    let dir = data_dir::resolve(data_dir)?;
    ServerServices::init(&dir)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        ExamSealError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {e}", path.display()),
        ))
    })?;
    Ok(serde_json::from_str(&data)?)
}

fn write_json<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)?;
            info!(path = %path.display(), "written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn prefetch_parses_rfc3339_window() {
        let cli = Cli::try_parse_from([
            "examseal",
            "--data-dir",
            "/tmp/x",
            "prefetch",
            "--exam-id",
            "E1",
            "--exam-code",
            "CS101",
            "--exam-title",
            "Intro",
            "--user",
            "U1",
            "--content",
            "content.json",
            "--start",
            "2026-06-01T09:00:00Z",
        ])
        .unwrap();
        match cli.command {
            Commands::Prefetch { start, end, .. } => {
                assert_eq!(start.unwrap().to_rfc3339(), "2026-06-01T09:00:00+00:00");
                assert!(end.is_none());
            }
            _ => panic!("expected prefetch"),
        }
    }

    #[test]
    fn end_to_end_through_the_service_layer() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let content = dir.join("content.json");
        std::fs::write(&content, r#"{"questions":[{"id":"q1"}]}"#).unwrap();

        let services = server(Some(dir)).unwrap();
        let client_config = dir.join("client.json");
        write_json(&services.client_config(), Some(&client_config)).unwrap();
        drop(services);

        let start = Utc::now();
        let start_arg = start.to_rfc3339();
        let bundle_path = dir.join("bundle.json");
        run(Cli::try_parse_from([
            "examseal",
            "--data-dir",
            dir.to_str().unwrap(),
            "prefetch",
            "--exam-id",
            "E1",
            "--exam-code",
            "CS101",
            "--exam-title",
            "Intro",
            "--user",
            "U1",
            "--content",
            content.to_str().unwrap(),
            "--start",
            start_arg.as_str(),
            "--out",
            bundle_path.to_str().unwrap(),
        ])
        .unwrap())
        .unwrap();

        let bundle: PrefetchBundle = read_json(&bundle_path).unwrap();
        let config: ClientConfig = read_json(&client_config).unwrap();
        let opened = ClientVerifier::from_client_config(&config)
            .unwrap()
            .verify_and_open_at(
                &bundle.signed_license,
                &bundle.encrypted_content,
                Some("U1"),
                start + chrono::Duration::minutes(1),
            )
            .unwrap();
        assert_eq!(opened.license.exam_id, "E1");
    }

    #[test]
    fn reconcile_command_stores_result_and_removes_batch() {
        use examseal_core::types::{Answer, AnswerEntry, ReconcileOutcome};

        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let data_dir = dir.to_str().unwrap();

        let client_config = dir.join("client.json");
        let services = server(Some(dir)).unwrap();
        write_json(&services.client_config(), Some(&client_config)).unwrap();
        drop(services);

        let answers_path = dir.join("answers.json");
        let answers = AnswersMap::from([(
            "q1".to_owned(),
            AnswerEntry::new("q1", Answer::text("Paris"), 40),
        )]);
        write_json(&answers, Some(&answers_path)).unwrap();

        let package_path = dir.join("package.json");
        run(Cli::try_parse_from([
            "examseal",
            "--data-dir",
            data_dir,
            "seal-answers",
            "--client-config",
            client_config.to_str().unwrap(),
            "--answers",
            answers_path.to_str().unwrap(),
            "--out",
            package_path.to_str().unwrap(),
        ])
        .unwrap())
        .unwrap();

        let batch_path = dir.join("batch.zip");
        run(Cli::try_parse_from([
            "examseal",
            "bundle",
            "--exam-id",
            "E1",
            "--student-id",
            "U1",
            "--out",
            batch_path.to_str().unwrap(),
            package_path.to_str().unwrap(),
        ])
        .unwrap())
        .unwrap();

        let outcome_path = dir.join("outcome.json");
        run(Cli::try_parse_from([
            "examseal",
            "--data-dir",
            data_dir,
            "reconcile",
            "--exam-id",
            "E1",
            "--user",
            "U1",
            "--batch",
            batch_path.to_str().unwrap(),
            "--remove-batch",
            "--out",
            outcome_path.to_str().unwrap(),
        ])
        .unwrap())
        .unwrap();

        assert!(!batch_path.exists());
        let outcome: ReconcileOutcome = read_json(&outcome_path).unwrap();
        assert_eq!(outcome.submissions_processed, 1);

        let services = server(Some(dir)).unwrap();
        let stored = services.sessions().result(&outcome.session_id).unwrap();
        assert!(stored.is_some());
    }
}
