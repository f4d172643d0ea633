use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad delimiter, empty marker, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Every candidate source was skipped or none were supplied.
    #[error("no usable source tables ({skipped} skipped)")]
    NoUsableSources { skipped: usize },
    /// Merged table header lacks one of the identity columns.
    #[error("merged header is missing identity column '{column}'")]
    MissingIdentityColumns { column: String },
    /// Merged table has no header line at all.
    #[error("merged table is too short: {lines} line(s)")]
    TruncatedTable { lines: usize },
    /// Side-store does not belong to the merged table it was paired with.
    #[error("side-store {merge_id} does not match merged table: {reason}")]
    SidecarMismatch { merge_id: String, reason: String },
    /// Side-store document could not be decoded.
    #[error("side-store decode error: {0}")]
    SidecarDecode(String),
    /// Side-store written by an incompatible schema.
    #[error("unsupported side-store schema version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },
}
