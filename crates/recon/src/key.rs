use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::classify::parse_number;

/// Joins normalized cells inside a key.
pub const KEY_SEPARATOR: &str = "|";

/// Prefix of keys built from numeric-only rows.
pub const FALLBACK_PREFIX: &str = "#RAW:";

/// Cross-source identity of one operation row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(String);

impl RowKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upper-case and collapse internal whitespace runs to a single space.
pub fn normalize_text(cell: &str) -> String {
    cell.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Derive the key from the non-numeric cells of the structural prefix.
///
/// Numeric cells are left out so the key survives differing time values.
/// Rows with no text at all fall back to every non-empty structural cell.
pub fn derive_key(cells: &[String], prefix_len: usize) -> RowKey {
    let prefix = &cells[..prefix_len.min(cells.len())];

    let parts: Vec<String> = prefix
        .iter()
        .filter(|c| !c.trim().is_empty() && !parse_number(c).is_number())
        .map(|c| normalize_text(c))
        .collect();

    if !parts.is_empty() {
        return RowKey(parts.join(KEY_SEPARATOR));
    }

    let raw: Vec<String> = prefix
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| normalize_text(c))
        .collect();
    RowKey(format!("{FALLBACK_PREFIX}{}", raw.join(KEY_SEPARATOR)))
}

/// Qualifies repeated base keys within one source: the first occurrence
/// keeps its key, the n-th repeat becomes `KEY#n`.
///
/// Use one instance per source table, in row order, on both the merge and
/// the reconstruct side.
#[derive(Debug, Default)]
pub struct KeyOccurrences {
    seen: HashMap<RowKey, usize>,
}

impl KeyOccurrences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn qualify(&mut self, base: RowKey) -> RowKey {
        let count = self.seen.entry(base.clone()).or_insert(0);
        let n = *count;
        *count += 1;
        if n == 0 {
            base
        } else {
            RowKey(format!("{}#{n}", base.0))
        }
    }
}
