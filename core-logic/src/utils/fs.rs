//! Small file helpers shared by the ledger, config and session stores.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `data` to a temp file in the same directory, then rename over `path`.
/// Readers see either the old or the new content, never a partial file.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Append one line, creating the file if needed.
pub(crate) fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/users.txt");
        atomic_write(&path, b"a\nb\n").unwrap();
        atomic_write(&path, b"b\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "b\n");
    }

    #[test]
    fn test_append_line_creates_and_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("done.txt");
        append_line(&path, "alice").unwrap();
        append_line(&path, "bob").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "alice\nbob\n");
    }
}
