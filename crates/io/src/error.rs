use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed delimited text in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("side-store {path}: {reason}")]
    Json { path: PathBuf, reason: String },
    #[error("no side-store for {stem} in {dir}{}", id_suffix(.merge_id))]
    SidecarNotFound {
        dir: PathBuf,
        stem: String,
        merge_id: Option<String>,
    },
    #[error("side-store {path} has schema version {found}, expected {expected}")]
    UnsupportedSchema {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("invalid merge id '{0}': expected 12 lowercase hex characters")]
    InvalidMergeId(String),
    #[error("unknown text encoding '{0}'")]
    UnknownEncoding(String),
}

fn id_suffix(merge_id: &Option<String>) -> String {
    merge_id
        .as_deref()
        .map(|id| format!(" with merge id {id}"))
        .unwrap_or_default()
}

impl IoError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
