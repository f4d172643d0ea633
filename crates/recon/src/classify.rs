//! Pure cell/row classification: numbers, time-component rows,
//! characteristic codes and value-cell lookup.

use std::ops::RangeInclusive;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;

/// `V0` + three digits, optionally followed by `[.]ddd`.
static CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)V0(\d{3})(?:\.?\d{3})?").expect("valid code pattern"));

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue {
    Number(f64),
    NotANumber,
}

impl CellValue {
    pub fn as_number(self) -> Option<f64> {
        match self {
            CellValue::Number(x) => Some(x),
            CellValue::NotANumber => None,
        }
    }

    pub fn is_number(self) -> bool {
        matches!(self, CellValue::Number(_))
    }
}

/// Parse a locale-flexible decimal: `12`, ` 7,5 `, `-0.25`.
///
/// Exactly one of `.` / `,` may appear as the decimal separator. Thousands
/// separators, exponents and non-finite spellings are rejected.
pub fn parse_number(cell: &str) -> CellValue {
    let s = cell.trim();
    let body = s.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(s);
    if body.is_empty() {
        return CellValue::NotANumber;
    }

    let mut digits = 0usize;
    let mut separators = 0usize;
    for ch in body.chars() {
        match ch {
            '0'..='9' => digits += 1,
            '.' | ',' => separators += 1,
            _ => return CellValue::NotANumber,
        }
    }
    if digits == 0 || separators > 1 {
        return CellValue::NotANumber;
    }

    match s.replace(',', ".").parse::<f64>() {
        Ok(x) if x.is_finite() => CellValue::Number(x),
        _ => CellValue::NotANumber,
    }
}

/// Render a value for output: whole numbers without a fractional part,
/// everything else as shortest decimal text with `.`.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        // also folds -0.0 into "0"
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Case-fold and trim; the comparison form for marker and unit tokens.
fn fold(cell: &str) -> String {
    cell.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    TimeComponent,
    Ordinary,
}

/// Characteristic code as found in a row, upper-cased (e.g. `V0950.010`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacteristicCode(String);

impl CharacteristicCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The three digits following `V0`, e.g. 950 for `V0950.010`.
    pub fn class(&self) -> Option<u16> {
        CODE_RE
            .captures(&self.0)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

impl std::fmt::Display for CharacteristicCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Row classifier built once per run from [`ClassifierConfig`].
#[derive(Debug, Clone)]
pub struct Classifier {
    time_marker: String,
    time_units: Vec<String>,
    max_range: RangeInclusive<u16>,
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let [lo, hi] = config.max_code_range;
        Self {
            time_marker: fold(&config.time_marker),
            time_units: config.time_units.iter().map(|u| fold(u)).collect(),
            max_range: lo..=hi,
        }
    }

    pub fn row_kind(&self, cells: &[String]) -> RowKind {
        if cells.iter().any(|c| fold(c) == self.time_marker) {
            RowKind::TimeComponent
        } else {
            RowKind::Ordinary
        }
    }

    /// First characteristic code found scanning left to right.
    pub fn characteristic_code(&self, cells: &[String]) -> Option<CharacteristicCode> {
        cells.iter().find_map(|c| {
            CODE_RE
                .find(c)
                .map(|m| CharacteristicCode(m.as_str().to_uppercase()))
        })
    }

    /// Whether rows carrying `code` aggregate by max.
    pub fn is_max_code(&self, code: &CharacteristicCode) -> bool {
        code.class().is_some_and(|c| self.max_range.contains(&c))
    }

    /// Locate the value cell.
    ///
    /// Right-to-left, the first numeric cell directly preceded by a unit token
    /// wins; otherwise the rightmost numeric cell. Column 0 holds the
    /// operation number and is never a value cell.
    pub fn value_index(&self, cells: &[String]) -> Option<usize> {
        let mut rightmost = None;
        for idx in (1..cells.len()).rev() {
            if !parse_number(&cells[idx]).is_number() {
                continue;
            }
            if rightmost.is_none() {
                rightmost = Some(idx);
            }
            if self.is_unit(&cells[idx - 1]) {
                return Some(idx);
            }
        }
        rightmost
    }

    fn is_unit(&self, cell: &str) -> bool {
        let folded = fold(cell);
        self.time_units.iter().any(|u| *u == folded)
    }
}
