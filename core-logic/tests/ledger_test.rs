use engage_core::{LedgerError, TargetLedger};
use std::collections::HashSet;
use std::path::Path;
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

fn lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_target_in_exactly_one_store() {
    let dir = TempDir::new().unwrap();
    let pending = dir.path().join("users.txt");
    let completed = dir.path().join("messaged_users.txt");
    write(&pending, "alice\nbob\ncarol\ndave\n");

    let ledger = TargetLedger::open(&pending, &completed).unwrap();
    for target in ["bob", "dave"] {
        assert!(ledger.complete(target).await.unwrap());
    }

    let on_disk_pending: HashSet<String> = lines(&pending).into_iter().collect();
    let on_disk_completed: HashSet<String> = lines(&completed).into_iter().collect();
    for target in ["alice", "bob", "carol", "dave"] {
        let in_pending = on_disk_pending.contains(target);
        let in_completed = on_disk_completed.contains(target);
        assert!(in_pending ^ in_completed, "{} in both or neither store", target);
    }
    assert_eq!(ledger.pending().await, vec!["alice", "carol"]);
}

#[tokio::test]
async fn test_complete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let pending = dir.path().join("users.txt");
    let completed = dir.path().join("done.txt");
    write(&pending, "alice\nbob\n");

    let ledger = TargetLedger::open(&pending, &completed).unwrap();
    assert!(ledger.complete("alice").await.unwrap());
    assert!(!ledger.complete("alice").await.unwrap());

    assert_eq!(lines(&pending), vec!["bob"]);
    assert_eq!(lines(&completed), vec!["alice"]);
}

#[tokio::test]
async fn test_resume_skips_completed_targets() {
    let dir = TempDir::new().unwrap();
    let pending = dir.path().join("users.txt");
    let completed = dir.path().join("done.txt");
    write(&pending, "alice\nbob\ncarol\n");

    {
        let ledger = TargetLedger::open(&pending, &completed).unwrap();
        ledger.complete("alice").await.unwrap();
    }

    let ledger = TargetLedger::open(&pending, &completed).unwrap();
    assert_eq!(ledger.resume_targets().await, vec!["bob", "carol"]);
    assert!(ledger.is_completed("alice").await);

    let filtered = ledger
        .exclude_completed(vec!["carol".into(), "alice".into(), "erin".into()])
        .await;
    assert_eq!(filtered, vec!["carol", "erin"]);
}

#[tokio::test]
async fn test_open_reconciles_interrupted_complete() {
    let dir = TempDir::new().unwrap();
    let pending = dir.path().join("users.txt");
    let completed = dir.path().join("done.txt");
    // A crash after the append but before the pending rewrite
    write(&pending, "# campaign\nalice\nbob\n");
    write(&completed, "alice\n");

    let ledger = TargetLedger::open(&pending, &completed).unwrap();

    assert_eq!(ledger.pending().await, vec!["bob"]);
    assert_eq!(std::fs::read_to_string(&pending).unwrap(), "# campaign\nbob\n");
}

#[tokio::test]
async fn test_concurrent_completes_keep_files_consistent() {
    let dir = TempDir::new().unwrap();
    let pending = dir.path().join("users.txt");
    let completed = dir.path().join("done.txt");
    let targets: Vec<String> = (0..30).map(|i| format!("user{}", i)).collect();
    write(&pending, &targets.join("\n"));

    let ledger = std::sync::Arc::new(TargetLedger::open(&pending, &completed).unwrap());
    let mut handles = Vec::new();
    for target in targets.iter().take(20).cloned() {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move { ledger.complete(&target).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(lines(&pending), targets[20..].to_vec());
    let mut done = lines(&completed);
    done.sort();
    let mut expected = targets[..20].to_vec();
    expected.sort();
    assert_eq!(done, expected);
}

#[test]
fn test_missing_pending_file_is_ledger_error() {
    let dir = TempDir::new().unwrap();
    let result = TargetLedger::open(dir.path().join("missing.txt"), dir.path().join("done.txt"));
    assert!(matches!(result, Err(LedgerError::Read { .. })));
}
