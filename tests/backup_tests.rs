//! Integration tests for account sessions and the backup scheduler, run
//! against scripted in-memory mailboxes.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use tokio_util::sync::CancellationToken;

use mailbackup::backup::{
    AccountBackupSession, BackupOptions, BackupOrchestrator, SessionOutcome, ShutdownPolicy,
};
use mailbackup::error::BackupError;
use mailbackup::model::account::AccountConfig;
use mailbackup::source::memory::{MemoryConnector, MemoryMailbox, MemoryMessage};

const INVOICE: &[u8] = include_bytes!("fixtures/invoice.eml");
const BOUNCE: &[u8] = include_bytes!("fixtures/bounce.eml");

fn message(n: usize) -> MemoryMessage {
    MemoryMessage::Raw(
        format!(
            "From: sender{n}@example.com\r\n\
             To: abc@abc.com\r\n\
             Subject: Message {n}\r\n\
             Date: Thu, 04 Jan 2024 10:00:{n:02} +0000\r\n\
             \r\n\
             Body {n}\r\n"
        )
        .into_bytes(),
    )
}

fn messages(count: usize) -> Vec<MemoryMessage> {
    (0..count).map(message).collect()
}

fn account(address: &str) -> AccountConfig {
    AccountConfig::new(address, "12345", "imap.abc.com", 993)
}

fn exported(dir: &Path) -> Vec<serde_json::Value> {
    let text = std::fs::read_to_string(dir.join("emails.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn options(root: &Path, shutdown: ShutdownPolicy) -> BackupOptions {
    BackupOptions {
        output_root: root.to_path_buf(),
        interval: Duration::from_secs(3600),
        shutdown,
    }
}

// ─── Session ────────────────────────────────────────────────────────

/// Records of an export with the per-run message ids blanked out.
fn without_message_ids(records: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
    records
        .into_iter()
        .map(|mut record| {
            let id = record["message_id"].as_str().unwrap().to_string();
            record["message_id"] = serde_json::Value::Null;
            for path in record["attachments"].as_array_mut().unwrap() {
                *path = path.as_str().unwrap().replace(&id, "<id>").into();
            }
            record
        })
        .collect()
}

#[test]
fn test_one_undecodable_message_of_ten_is_skipped() {
    let temp = TempDir::new().unwrap();
    let mut inbox = messages(10);
    inbox[4] = MemoryMessage::Raw(b"\r\n".to_vec());
    let memory = MemoryConnector::new().with_mailbox(
        "abc@abc.com",
        "12345",
        MemoryMailbox::new().folder("INBOX", inbox),
    );

    let session = AccountBackupSession::new(Arc::new(memory), temp.path());
    let outcome = session.run(&account("abc@abc.com"), &CancellationToken::new());

    let report = outcome.report().expect("session completed");
    assert_eq!(report.records, 9);
    assert_eq!(report.failed_messages, 1);
    assert!(report.export_ok);

    temp.child("backup_abc/emails.csv").assert(predicate::path::is_file());
    temp.child("backup_abc/emails.csv")
        .assert(predicate::str::contains("Message 9"));
    let csv = std::fs::read_to_string(temp.path().join("backup_abc/emails.csv")).unwrap();
    assert!(!csv.contains("Message 4"));
    assert_eq!(exported(&temp.path().join("backup_abc")).len(), 9);
}

#[test]
fn test_one_failed_fetch_of_ten_is_skipped() {
    let temp = TempDir::new().unwrap();
    let mut inbox = messages(10);
    inbox[4] = MemoryMessage::FetchError("NO [UNAVAILABLE] try again".into());
    let memory = MemoryConnector::new().with_mailbox(
        "abc@abc.com",
        "12345",
        MemoryMailbox::new().folder("INBOX", inbox),
    );

    let session = AccountBackupSession::new(Arc::new(memory), temp.path());
    let outcome = session.run(&account("abc@abc.com"), &CancellationToken::new());

    let report = outcome.report().expect("session completed");
    assert_eq!(report.records, 9);
    assert_eq!(report.failed_messages, 1);
    assert_eq!(exported(&temp.path().join("backup_abc")).len(), 9);
}

#[test]
fn test_folders_walked_in_listing_order() {
    let temp = TempDir::new().unwrap();
    let mailbox = MemoryMailbox::new()
        .folder("INBOX", messages(2))
        .noselect("[Gmail]")
        .folder("Archive", Vec::<MemoryMessage>::new())
        .folder("Sent", messages(1));
    let memory = MemoryConnector::new().with_mailbox("abc@abc.com", "12345", mailbox);

    let session = AccountBackupSession::new(Arc::new(memory), temp.path());
    let outcome = session.run(&account("abc@abc.com"), &CancellationToken::new());
    assert_eq!(outcome.report().unwrap().folders, 3);

    let folders: Vec<String> = exported(&temp.path().join("backup_abc"))
        .iter()
        .map(|r| r["folder"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(folders, vec!["INBOX", "INBOX", "Sent"]);
}

#[test]
fn test_attachments_sanitized_and_deduplicated() {
    let temp = TempDir::new().unwrap();
    let memory = MemoryConnector::new().with_mailbox(
        "abc@abc.com",
        "12345",
        MemoryMailbox::new().folder("INBOX", [INVOICE]),
    );

    let session = AccountBackupSession::new(Arc::new(memory), temp.path());
    let outcome = session.run(&account("abc@abc.com"), &CancellationToken::new());
    assert_eq!(outcome.report().unwrap().attachments, 2);

    let records = exported(&temp.path().join("backup_abc"));
    let record = &records[0];
    assert_eq!(record["subject"], "Facture n°1");
    assert_eq!(record["body"].as_str().unwrap().trim(), "Please find both invoices attached.");

    let message_id = record["message_id"].as_str().unwrap();
    let dir = temp.child("backup_abc").child("attachments").child(message_id);
    dir.child("f_1invoice.pdf")
        .assert(predicate::str::contains("%first"));
    dir.child("f_1invoice_1.pdf")
        .assert(predicate::str::contains("%second"));
}

#[test]
fn test_bounce_diagnostics_exported() {
    let temp = TempDir::new().unwrap();
    let memory = MemoryConnector::new().with_mailbox(
        "abc@abc.com",
        "12345",
        MemoryMailbox::new().folder("INBOX", [BOUNCE]),
    );

    let session = AccountBackupSession::new(Arc::new(memory), temp.path());
    session.run(&account("abc@abc.com"), &CancellationToken::new());

    let records = exported(&temp.path().join("backup_abc"));
    assert_eq!(records[0]["failed_recipients"], "nobody@nowhere.example");
    assert_eq!(records[0]["smtp_error_code"], "550");
    assert!(records[0]["diagnostic_code"]
        .as_str()
        .unwrap()
        .starts_with("smtp; 550 5.1.1"));
    assert!(records[0]["attachments"].as_array().unwrap().is_empty());
}

#[test]
fn test_undecodable_message_counted_as_failed() {
    let temp = TempDir::new().unwrap();
    let memory = MemoryConnector::new().with_mailbox(
        "abc@abc.com",
        "12345",
        MemoryMailbox::new().folder("INBOX", [message(1), MemoryMessage::Raw(b"\r\n".to_vec())]),
    );

    let session = AccountBackupSession::new(Arc::new(memory), temp.path());
    let outcome = session.run(&account("abc@abc.com"), &CancellationToken::new());
    let report = outcome.report().unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(report.failed_messages, 1);
}

#[test]
fn test_rerun_overwrites_exports_with_identical_content() {
    let temp = TempDir::new().unwrap();
    let mut inbox = messages(3);
    inbox.push(MemoryMessage::from(INVOICE));
    inbox.push(MemoryMessage::from(BOUNCE));
    let memory = MemoryConnector::new().with_mailbox(
        "abc@abc.com",
        "12345",
        MemoryMailbox::new().folder("INBOX", inbox),
    );
    let session = AccountBackupSession::new(Arc::new(memory), temp.path());
    let backup_dir = temp.path().join("backup_abc");

    let mut runs = Vec::new();
    for _ in 0..2 {
        let outcome = session.run(&account("abc@abc.com"), &CancellationToken::new());
        assert!(outcome.is_completed());
        runs.push(exported(&backup_dir));
    }

    assert_eq!(runs[1].len(), 5);
    assert_ne!(runs[0][0]["message_id"], runs[1][0]["message_id"]);
    let second = without_message_ids(runs.pop().unwrap());
    let first = without_message_ids(runs.pop().unwrap());
    assert_eq!(first, second);
}

#[test]
fn test_unreachable_host_aborts_without_output() {
    let temp = TempDir::new().unwrap();
    let memory = MemoryConnector::new().unreachable("imap.abc.com");
    let session = AccountBackupSession::new(Arc::new(memory.clone()), temp.path());

    let outcome = session.run(&account("abc@abc.com"), &CancellationToken::new());
    assert!(matches!(
        outcome,
        SessionOutcome::Aborted {
            error: BackupError::Connection { .. }
        }
    ));
    temp.child("backup_abc").assert(predicate::path::missing());
    assert_eq!(memory.connection_count(), 0);
}

// ─── Orchestrator ───────────────────────────────────────────────────

#[test]
fn test_empty_account_list_never_connects() {
    let memory = MemoryConnector::new();
    let result = BackupOrchestrator::new(
        Vec::new(),
        Arc::new(memory.clone()),
        BackupOptions::default(),
    );
    assert!(matches!(result, Err(BackupError::Config(_))));
    assert_eq!(memory.connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accounts_run_concurrently() {
    let temp = TempDir::new().unwrap();
    let memory = MemoryConnector::new()
        .with_mailbox("alice@abc.com", "12345", MemoryMailbox::new().folder("INBOX", messages(5)))
        .with_mailbox("bob@abc.com", "12345", MemoryMailbox::new().folder("INBOX", messages(5)))
        .with_fetch_latency(Duration::from_millis(100));

    let orchestrator = BackupOrchestrator::new(
        vec![account("alice@abc.com"), account("bob@abc.com")],
        Arc::new(memory.clone()),
        options(temp.path(), ShutdownPolicy::Drain),
    )
    .unwrap();

    let start = Instant::now();
    let report = orchestrator.run_cycle(&CancellationToken::new()).await;
    let elapsed = start.elapsed();

    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.records(), 10);
    // Sequential execution would need at least 1s of fetch latency.
    assert!(elapsed < Duration::from_millis(950), "cycle took {elapsed:?}");
    assert_eq!(memory.connection_count(), 2);
    assert_eq!(memory.logout_count(), 2);

    temp.child("backup_alice/emails.json").assert(predicate::path::is_file());
    temp.child("backup_bob/emails.json").assert(predicate::path::is_file());
}

#[tokio::test]
async fn test_failed_login_does_not_affect_other_accounts() {
    let temp = TempDir::new().unwrap();
    let memory = MemoryConnector::new()
        .with_mailbox("alice@abc.com", "other-secret", MemoryMailbox::new().folder("INBOX", messages(2)))
        .with_mailbox("bob@abc.com", "12345", MemoryMailbox::new().folder("INBOX", messages(2)));

    let orchestrator = BackupOrchestrator::new(
        vec![account("alice@abc.com"), account("bob@abc.com")],
        Arc::new(memory),
        options(temp.path(), ShutdownPolicy::Drain),
    )
    .unwrap();

    let report = orchestrator.run_cycle(&CancellationToken::new()).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].address, "bob@abc.com");
    assert!(!report.all_failed());

    temp.child("backup_alice").assert(predicate::path::missing());
    temp.child("backup_bob/emails.csv").assert(predicate::path::is_file());
}

fn slow_single_account(temp: &TempDir, shutdown: ShutdownPolicy) -> BackupOrchestrator {
    let memory = MemoryConnector::new()
        .with_mailbox("abc@abc.com", "12345", MemoryMailbox::new().folder("INBOX", messages(8)))
        .with_fetch_latency(Duration::from_millis(50));
    BackupOrchestrator::new(
        vec![account("abc@abc.com")],
        Arc::new(memory),
        options(temp.path(), shutdown),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_policy_stops_session_and_keeps_previous_snapshot() {
    let temp = TempDir::new().unwrap();
    let backup_dir = temp.child("backup_abc");
    backup_dir.create_dir_all().unwrap();
    backup_dir.child("emails.csv").write_str("previous snapshot").unwrap();

    let orchestrator = slow_single_account(&temp, ShutdownPolicy::Abort);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    let report = orchestrator.run_cycle(&cancel).await;
    assert_eq!(report.cancelled, 1);
    assert!(report.completed.is_empty());
    backup_dir
        .child("emails.csv")
        .assert(predicate::str::diff("previous snapshot"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drain_policy_finishes_running_session() {
    let temp = TempDir::new().unwrap();
    let orchestrator = slow_single_account(&temp, ShutdownPolicy::Drain);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    let report = orchestrator.run_cycle(&cancel).await;
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.records(), 8);
    assert_eq!(exported(&temp.path().join("backup_abc")).len(), 8);
}

#[tokio::test]
async fn test_scheduler_stops_while_waiting_for_next_cycle() {
    let temp = TempDir::new().unwrap();
    let memory = MemoryConnector::new().with_mailbox(
        "abc@abc.com",
        "12345",
        MemoryMailbox::new().folder("INBOX", messages(1)),
    );
    let orchestrator = BackupOrchestrator::new(
        vec![account("abc@abc.com")],
        Arc::new(memory.clone()),
        options(temp.path(), ShutdownPolicy::Drain),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let cycles = tokio::time::timeout(Duration::from_secs(5), orchestrator.run_forever(cancel))
        .await
        .expect("scheduler woke up on cancellation");
    assert_eq!(cycles, 1);
    assert_eq!(memory.connection_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_runs_again_after_interval() {
    let temp = TempDir::new().unwrap();
    let memory = MemoryConnector::new().with_mailbox(
        "abc@abc.com",
        "12345",
        MemoryMailbox::new().folder("INBOX", messages(2)),
    );
    let orchestrator = BackupOrchestrator::new(
        vec![account("abc@abc.com")],
        Arc::new(memory.clone()),
        BackupOptions {
            interval: Duration::from_millis(50),
            ..options(temp.path(), ShutdownPolicy::Drain)
        },
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        trigger.cancel();
    });

    let cycles = tokio::time::timeout(Duration::from_secs(5), orchestrator.run_forever(cancel))
        .await
        .expect("scheduler stopped on cancellation");
    assert!(cycles >= 2, "only {cycles} cycle(s) ran");
    assert_eq!(memory.connection_count(), cycles);
    assert_eq!(memory.logout_count(), cycles);
    assert_eq!(exported(&temp.path().join("backup_abc")).len(), 2);
}
