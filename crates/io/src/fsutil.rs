// Filesystem helpers: durable writes, directory listing, cleanup

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::IoError;

/// Write `bytes` to `<path>.tmp`, sync it and rename it over `path`.
///
/// Parent directories are created as needed.
pub fn write_durable(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| IoError::write(parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(IoError::write(&tmp_path, e));
    }

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        IoError::write(path, e)
    })
}

/// `*.csv` files directly inside `dir` (case-insensitive), sorted by name.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, IoError> {
    let entries = std::fs::read_dir(dir).map_err(|e| IoError::read(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| IoError::read(dir, e))?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Delete a processed input. Failure is logged, never fatal.
pub fn remove_processed(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not delete processed file");
            false
        }
    }
}

/// Replace characters that are not valid in file names on common platforms.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_end_matches(|c: char| c == '.' || c == ' ').to_string();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn durable_write_replaces_target_and_leaves_no_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        write_durable(&path, b"first").unwrap();
        write_durable(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("nested/out.csv.tmp").exists());
    }

    #[test]
    fn lists_only_csv_sorted() {
        let dir = tempdir().unwrap();
        for name in ["b.csv", "a.CSV", "notes.txt", "c.csv.tmp"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("sub.csv")).unwrap();

        let names: Vec<String> = list_csv_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }

    #[test]
    fn missing_dir_is_read_error() {
        let dir = tempdir().unwrap();
        let err = list_csv_files(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, IoError::Read { .. }));
    }

    #[test]
    fn remove_processed_reports_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.csv");
        fs::write(&path, "x").unwrap();
        assert!(remove_processed(&path));
        assert!(!remove_processed(&path));
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_file_name("100/200_M:7_S?1_20260114_0930"), "100_200_M_7_S_1_20260114_0930");
        assert_eq!(sanitize_file_name("name. "), "name");
        assert_eq!(sanitize_file_name("   "), "unnamed");
    }
}
