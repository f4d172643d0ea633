use serde::{Deserialize, Serialize};

use crate::classify::CharacteristicCode;
use crate::key::RowKey;

/// Source index 0..MAX_SOURCES within one merge.
pub type Slot = usize;

/// Upper bound on sources combined into one merged table.
pub const MAX_SOURCES: usize = 3;

/// Per-slot order identity columns appended during merge.
pub const IDENTITY_COLUMNS: [&str; MAX_SOURCES] =
    ["Fertigungsauftrag_1", "Fertigungsauftrag_2", "Fertigungsauftrag_3"];

/// Reserved original-operation-number columns, always written empty.
pub const ORIGINAL_OP_COLUMNS: [&str; MAX_SOURCES] = [
    "OriginalSAP_Fertigungsauftrag_1",
    "OriginalSAP_Fertigungsauftrag_2",
    "OriginalSAP_Fertigungsauftrag_3",
];

/// Metadata keys read from the head of every export.
pub const META_ORDER: &str = "Fertigungsauftrag";
pub const META_MATERIAL: &str = "Material-Id";
pub const META_SERIAL: &str = "MSN";
pub const META_ROUTING: &str = "Arbeitsplan";

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Metadata lines + header + data rows, as read from or written to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub metadata: Vec<Vec<String>>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Flatten back into lines for writing.
    pub fn to_lines(&self) -> Vec<Vec<String>> {
        let mut lines = Vec::with_capacity(self.metadata.len() + 1 + self.rows.len());
        lines.extend(self.metadata.iter().cloned());
        lines.push(self.header.clone());
        lines.extend(self.rows.iter().cloned());
        lines
    }
}

/// Identification fields from a source's metadata lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceMeta {
    pub order_id: String,
    pub material_id: String,
    pub serial: String,
    pub routing: String,
}

impl SourceMeta {
    /// `{order}_{material}_{serial}_{timestamp}`
    pub fn reconstruction_name(&self, timestamp: &str) -> String {
        format!(
            "{}_{}_{}_{}",
            self.order_id, self.material_id, self.serial, timestamp
        )
    }
}

/// One per-order export, ready to merge.
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub file_name: String,
    pub meta: SourceMeta,
    pub table: Table,
}

/// The virtual export: structural header + six identity columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedTable {
    pub file_name: String,
    pub table: Table,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    Sum,
    Max,
}

impl std::fmt::Display for AggregationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Max => write!(f, "max"),
        }
    }
}

/// Running sum/max of the time values contributed under one key.
#[derive(Debug, Clone)]
pub struct AggregationBucket {
    pub sum: f64,
    pub max: f64,
    pub is_max: bool,
    pub value_index: usize,
    pub code: Option<CharacteristicCode>,
}

impl AggregationBucket {
    pub fn new(value_index: usize) -> Self {
        Self {
            sum: 0.0,
            max: f64::NEG_INFINITY,
            is_max: false,
            value_index,
            code: None,
        }
    }

    /// Add one contribution. Max policy is sticky once any row sets it.
    pub fn add(&mut self, value: f64, max_coded: bool) {
        self.sum += value;
        if value > self.max {
            self.max = value;
        }
        self.is_max |= max_coded;
    }

    pub fn policy(&self) -> AggregationPolicy {
        if self.is_max {
            AggregationPolicy::Max
        } else {
            AggregationPolicy::Sum
        }
    }

    pub fn result(&self) -> f64 {
        match self.policy() {
            AggregationPolicy::Sum => self.sum,
            AggregationPolicy::Max => self.max,
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Non-fatal findings reported back to the caller instead of printed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Source had no structural header row; skipped.
    MissingHeaderMarker { file: String },
    /// Source arrived after all slots were taken; skipped.
    TooManySources { file: String },
    /// Source header differs from the first source's; rows were fitted.
    HeaderMismatch { file: String, expected: usize, found: usize },
    /// Non-empty cells beyond the structural width were cut off.
    TruncatedCells { file: String, row: usize, dropped: usize },
    /// Merged row with no side-store entry; not attributed to any source.
    DroppedRow { row: usize, key: RowKey },
    /// Identity columns found at a different position than the manifest says.
    PrefixMismatch { manifest: usize, header: usize },
    /// Identity column names a source the side-store does not know.
    UnknownIdentity { row: usize, slot: Slot, value: String },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHeaderMarker { file } => {
                write!(f, "{file}: no structural header row, skipped")
            }
            Self::TooManySources { file } => {
                write!(f, "{file}: more than {MAX_SOURCES} sources, skipped")
            }
            Self::HeaderMismatch { file, expected, found } => {
                write!(f, "{file}: header has {found} columns, expected {expected}")
            }
            Self::TruncatedCells { file, row, dropped } => {
                write!(f, "{file}: row {row}: dropped {dropped} cell(s) beyond header width")
            }
            Self::DroppedRow { row, key } => {
                write!(f, "row {row}: no side-store entry for key '{key}', dropped")
            }
            Self::PrefixMismatch { manifest, header } => write!(
                f,
                "identity columns start at {header}, manifest says {manifest}; using manifest"
            ),
            Self::UnknownIdentity { row, slot, value } => {
                write!(f, "row {row}: slot {slot} names unknown source '{value}'")
            }
        }
    }
}
