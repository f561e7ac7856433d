//! # Target Ledger
//!
//! Durable pending/completed bookkeeping so a campaign can be stopped and
//! resumed without acting on the same target twice.
//!
//! - The pending store is a plain text file, one handle per line, rewritten
//!   wholesale through a temp file and an atomic rename. `#` comment lines
//!   keep their place among the remaining targets; blank lines and
//!   duplicate handles are dropped.
//! - The completed store is append-only.
//!
//! `complete` appends first and rewrites second. A crash between the two
//! leaves the target in both files; [`TargetLedger::open`] drops completed
//! targets from pending, so a target is never processed twice.

use crate::error::LedgerError;
use crate::types::Target;
use crate::utils::{append_line, atomic_write};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One retained line of the pending store.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingLine {
    Comment(String),
    Target(Target),
}

impl PendingLine {
    fn target(&self) -> Option<&Target> {
        match self {
            PendingLine::Target(t) => Some(t),
            PendingLine::Comment(_) => None,
        }
    }

    fn as_str(&self) -> &str {
        match self {
            PendingLine::Comment(c) => c,
            PendingLine::Target(t) => t,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    lines: Vec<PendingLine>,
    completed: HashSet<Target>,
}

impl LedgerState {
    fn pending(&self) -> impl Iterator<Item = &Target> {
        self.lines.iter().filter_map(PendingLine::target)
    }

    fn is_pending(&self, target: &str) -> bool {
        self.pending().any(|t| t == target)
    }
}

#[derive(Debug)]
pub struct TargetLedger {
    pending_path: PathBuf,
    completed_path: PathBuf,
    state: Mutex<LedgerState>,
}

impl TargetLedger {
    /// Open a ledger pair. The pending file must exist; a missing completed
    /// file is treated as empty.
    pub fn open(
        pending_path: impl Into<PathBuf>,
        completed_path: impl Into<PathBuf>,
    ) -> Result<Self, LedgerError> {
        let pending_path = pending_path.into();
        let completed_path = completed_path.into();

        let mut lines = parse_lines(&read_store(&pending_path)?);

        let completed: HashSet<Target> = if completed_path.exists() {
            parse_targets(&read_store(&completed_path)?).into_iter().collect()
        } else {
            HashSet::new()
        };

        let before = lines.len();
        lines.retain(|line| line.target().map_or(true, |t| !completed.contains(t)));
        let state = LedgerState { lines, completed };

        if state.lines.len() != before {
            info!(
                "Ledger {}: dropped {} already-completed targets from pending",
                pending_path.display(),
                before - state.lines.len()
            );
            write_pending(&pending_path, &state.lines)?;
        }

        debug!(
            "Ledger opened: {} pending, {} completed",
            state.pending().count(),
            state.completed.len()
        );

        Ok(Self {
            pending_path,
            completed_path,
            state: Mutex::new(state),
        })
    }

    /// Parse a target file: trimmed, blank and `#` lines skipped, duplicates
    /// dropped (first occurrence wins). A missing file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Target>, LedgerError> {
        Ok(parse_targets(&read_store(path.as_ref())?))
    }

    pub fn pending_path(&self) -> &Path {
        &self.pending_path
    }

    pub fn completed_path(&self) -> &Path {
        &self.completed_path
    }

    pub async fn pending(&self) -> Vec<Target> {
        self.state.lock().await.pending().cloned().collect()
    }

    pub async fn completed(&self) -> HashSet<Target> {
        self.state.lock().await.completed.clone()
    }

    pub async fn is_completed(&self, target: &str) -> bool {
        self.state.lock().await.completed.contains(target)
    }

    /// Targets left to process after a restart.
    pub async fn resume_targets(&self) -> Vec<Target> {
        self.pending().await
    }

    /// Filter out anything already in the completed store, keeping order.
    pub async fn exclude_completed(&self, targets: Vec<Target>) -> Vec<Target> {
        let state = self.state.lock().await;
        targets
            .into_iter()
            .filter(|t| !state.completed.contains(t))
            .collect()
    }

    /// Move `target` from pending to completed.
    ///
    /// Returns `Ok(false)` when the target was already completed. A target
    /// that was never pending is still recorded as completed.
    pub async fn complete(&self, target: &str) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        let was_pending = state.is_pending(target);

        if state.completed.contains(target) && !was_pending {
            debug!("Ledger: '{}' already completed", target);
            return Ok(false);
        }

        if !state.completed.contains(target) {
            let path = self.completed_path.clone();
            let line = target.to_string();
            run_blocking(&self.completed_path, move || append_line(&path, &line)).await?;
            state.completed.insert(target.to_string());
        }

        if was_pending {
            state
                .lines
                .retain(|line| line.target().map_or(true, |t| t != target));
            let path = self.pending_path.clone();
            let content = render(&state.lines);
            if let Err(e) = run_blocking(&self.pending_path, move || {
                atomic_write(&path, content.as_bytes())
            })
            .await
            {
                warn!(
                    "Ledger: '{}' recorded as completed but pending rewrite failed: {}",
                    target, e
                );
                return Err(e);
            }
        }

        Ok(true)
    }
}

/// Write a list of targets in ledger format, e.g. the output of a scrape.
pub fn write_targets(
    path: impl AsRef<Path>,
    header: Option<&str>,
    targets: &[Target],
) -> Result<(), LedgerError> {
    let header = header.map(|h| {
        if h.starts_with('#') {
            PendingLine::Comment(h.to_string())
        } else {
            PendingLine::Comment(format!("# {}", h))
        }
    });
    let lines: Vec<PendingLine> = header
        .into_iter()
        .chain(targets.iter().cloned().map(PendingLine::Target))
        .collect();
    write_pending(path.as_ref(), &lines)
}

/// Comments and first occurrences of each handle, in file order.
fn parse_lines(content: &str) -> Vec<PendingLine> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            if line.starts_with('#') {
                Some(PendingLine::Comment(line.to_string()))
            } else if seen.insert(line.to_string()) {
                Some(PendingLine::Target(line.to_string()))
            } else {
                None
            }
        })
        .collect()
}

fn parse_targets(content: &str) -> Vec<Target> {
    parse_lines(content)
        .into_iter()
        .filter_map(|line| match line {
            PendingLine::Target(t) => Some(t),
            PendingLine::Comment(_) => None,
        })
        .collect()
}

fn render(lines: &[PendingLine]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line.as_str());
        out.push('\n');
    }
    out
}

fn read_store(path: &Path) -> Result<String, LedgerError> {
    std::fs::read_to_string(path).map_err(|e| LedgerError::Read {
        path: path.display().to_string(),
        msg: e.to_string(),
    })
}

fn write_pending(path: &Path, lines: &[PendingLine]) -> Result<(), LedgerError> {
    atomic_write(path, render(lines).as_bytes()).map_err(|e| LedgerError::Write {
        path: path.display().to_string(),
        msg: e.to_string(),
    })
}

async fn run_blocking<F>(path: &Path, op: F) -> Result<(), LedgerError>
where
    F: FnOnce() -> std::io::Result<()> + Send + 'static,
{
    let to_error = |msg: String| LedgerError::Write {
        path: path.display().to_string(),
        msg,
    };
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| to_error(e.to_string()))?
        .map_err(|e| to_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let parsed = parse_targets("# users\n\n alice \nbob\n# mid\nalice\ncarol\n");
        assert_eq!(parsed, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = TargetLedger::load(dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, LedgerError::Read { .. }));
    }

    #[tokio::test]
    async fn test_header_survives_rewrite() {
        let dir = TempDir::new().unwrap();
        let pending = dir.path().join("users.txt");
        std::fs::write(&pending, "# targets\nalice\nbob\n").unwrap();
        let ledger = TargetLedger::open(&pending, dir.path().join("done.txt")).unwrap();
        assert!(ledger.complete("alice").await.unwrap());
        assert_eq!(std::fs::read_to_string(&pending).unwrap(), "# targets\nbob\n");
    }

    #[tokio::test]
    async fn test_comments_keep_their_place_on_rewrite() {
        let dir = TempDir::new().unwrap();
        let pending = dir.path().join("users.txt");
        std::fs::write(&pending, "# a\nalice\n# mid\nbob\n\ncarol\n").unwrap();
        let ledger = TargetLedger::open(&pending, dir.path().join("done.txt")).unwrap();

        assert!(ledger.complete("alice").await.unwrap());
        assert_eq!(std::fs::read_to_string(&pending).unwrap(), "# a\n# mid\nbob\ncarol\n");

        assert!(ledger.complete("carol").await.unwrap());
        assert_eq!(std::fs::read_to_string(&pending).unwrap(), "# a\n# mid\nbob\n");
        assert_eq!(ledger.pending().await, vec!["bob"]);
    }

    #[test]
    fn test_open_drops_completed_but_keeps_comment_order() {
        let dir = TempDir::new().unwrap();
        let pending = dir.path().join("users.txt");
        let done = dir.path().join("done.txt");
        std::fs::write(&pending, "alice\n# batch two\nbob\nalice\ncarol\n").unwrap();
        std::fs::write(&done, "bob\n").unwrap();

        TargetLedger::open(&pending, &done).unwrap();
        assert_eq!(
            std::fs::read_to_string(&pending).unwrap(),
            "alice\n# batch two\ncarol\n"
        );
    }

    #[test]
    fn test_write_targets_prefixes_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("likers.txt");
        write_targets(&path, Some("likers of 123"), &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# likers of 123\na\nb\n");
        assert_eq!(TargetLedger::load(&path).unwrap(), vec!["a", "b"]);
    }
}
