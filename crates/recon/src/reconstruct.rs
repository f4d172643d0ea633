//! Reconstruction of per-source tables from a merged table and its
//! side-store.
//!
//! The merged row only carries the aggregate; exact per-source values,
//! presence and any cells that differed between sources come from the
//! [`Sidecar`]. Without one, [`reconstruct_without_sidecar`] can still split
//! rows by their identity columns, but values stay aggregated.

use tracing::{debug, warn};

use crate::classify::{format_value, parse_number, Classifier, RowKind};
use crate::error::MergeError;
use crate::key::{derive_key, KeyOccurrences, RowKey};
use crate::model::{
    AggregationPolicy, Diagnostic, MergedTable, Slot, Table, IDENTITY_COLUMNS, MAX_SOURCES,
    ORIGINAL_OP_COLUMNS,
};
use crate::sidecar::{Sidecar, SidecarEntry};
use crate::table::trim_trailing_empty;

/// Relative tolerance for the sum round-trip check.
const SUM_TOLERANCE: f64 = 1e-9;

/// How per-source rows are recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconstructMode {
    /// Exact recovery from the side-store.
    #[default]
    Sidecar,
    /// Split by identity columns only; aggregated values are kept.
    IdentityColumnsOnly,
}

impl std::fmt::Display for ReconstructMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sidecar => write!(f, "sidecar"),
            Self::IdentityColumnsOnly => write!(f, "identity-columns-only"),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity columns
// ---------------------------------------------------------------------------

/// Positions of the six appended columns in a merged header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityColumns {
    pub order: [usize; MAX_SOURCES],
    pub original: [usize; MAX_SOURCES],
}

impl IdentityColumns {
    pub fn locate(header: &[String]) -> Result<Self, MergeError> {
        let find = |name: &str| -> Result<usize, MergeError> {
            header
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| MergeError::MissingIdentityColumns {
                    column: name.to_string(),
                })
        };

        let mut order = [0; MAX_SOURCES];
        let mut original = [0; MAX_SOURCES];
        for slot in 0..MAX_SOURCES {
            order[slot] = find(IDENTITY_COLUMNS[slot])?;
            original[slot] = find(ORIGINAL_OP_COLUMNS[slot])?;
        }
        Ok(Self { order, original })
    }

    /// Index of the leftmost identity column: the structural width the
    /// header itself implies.
    pub fn start(&self) -> usize {
        self.order
            .iter()
            .chain(self.original.iter())
            .copied()
            .min()
            .unwrap_or(0)
    }

    /// Identity values of one merged row, slot order. Missing cells read as
    /// empty.
    pub fn values(&self, row: &[String]) -> Vec<String> {
        self.order
            .iter()
            .map(|&i| row.get(i).map(|c| c.trim().to_string()).unwrap_or_default())
            .collect()
    }
}

/// Zero-pad a purely numeric operation number to four digits: `50` → `0050`.
/// Anything else is returned unchanged.
pub fn normalize_operation_number(cell: &str) -> String {
    let trimmed = cell.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        format!("{trimmed:0>4}")
    } else {
        cell.to_string()
    }
}

/// Identity values of every row, for side-store lookup.
pub fn identity_values(merged: &MergedTable) -> Result<Vec<Vec<String>>, MergeError> {
    let ids = IdentityColumns::locate(&merged.table.header)?;
    Ok(merged.table.rows.iter().map(|r| ids.values(r)).collect())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One recovered per-source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedTable {
    pub slot: Slot,
    /// Reconstruction name; the output file is this name plus `.csv`.
    pub name: String,
    pub table: Table,
}

#[derive(Debug, Default)]
pub struct ReconstructOutput {
    pub tables: Vec<ReconstructedTable>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A merged row reduced to its structural prefix, with its qualified key.
struct KeyedRow {
    index: usize,
    key: RowKey,
    prefix: Vec<String>,
}

/// Cut every row to `prefix_len` cells and derive occurrence-qualified keys
/// the same way the merge did, then normalize the operation number.
fn keyed_rows(table: &Table, prefix_len: usize) -> Vec<KeyedRow> {
    let mut occurrences = KeyOccurrences::new();
    table
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let mut prefix: Vec<String> = row.iter().take(prefix_len).cloned().collect();
            prefix.resize(prefix_len, String::new());
            let key = occurrences.qualify(derive_key(&prefix, prefix_len));
            if let Some(first) = prefix.first_mut() {
                *first = normalize_operation_number(first);
            }
            KeyedRow { index, key, prefix }
        })
        .collect()
}

/// Structural width to use: the manifest's, unless it runs into the
/// identity columns.
fn resolve_prefix(
    merged: &MergedTable,
    sidecar: &Sidecar,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<(IdentityColumns, usize), MergeError> {
    let ids = IdentityColumns::locate(&merged.table.header)?;
    let from_header = ids.start();
    let from_manifest = sidecar.manifest.structural_prefix_len;

    if from_manifest > from_header {
        return Err(MergeError::SidecarMismatch {
            merge_id: sidecar.manifest.merge_id.clone(),
            reason: format!(
                "structural prefix of {from_manifest} columns overlaps identity columns at {from_header}"
            ),
        });
    }
    if from_manifest != from_header {
        warn!(manifest = from_manifest, header = from_header, "structural prefix mismatch");
        diagnostics.push(Diagnostic::PrefixMismatch {
            manifest: from_manifest,
            header: from_header,
        });
    }
    Ok((ids, from_manifest))
}

/// Rebuild one source's row from the merged prefix and its side-store entry.
fn source_row(
    prefix: &[String],
    entry: &SidecarEntry,
    slot: Slot,
    classifier: &Classifier,
) -> Vec<String> {
    let mut row = prefix.to_vec();

    if let Some(cells) = entry.divergent.get(&slot) {
        for (&i, value) in cells {
            if let Some(cell) = row.get_mut(i) {
                *cell = value.clone();
            }
        }
    }

    if entry.is_time_component() || classifier.row_kind(&row) == RowKind::TimeComponent {
        let idx = entry.value_index.or_else(|| classifier.value_index(&row));
        let restored = entry
            .raw_values
            .get(&slot)
            .map(|v| format_value(*v))
            .or_else(|| entry.raw_text.get(&slot).cloned());
        if let (Some(idx), Some(text)) = (idx, restored) {
            if let Some(cell) = row.get_mut(idx) {
                *cell = text;
            }
        }
    }

    if let Some(first) = row.first_mut() {
        *first = normalize_operation_number(first);
    }
    row
}

/// Recover the per-source tables a merge consumed.
///
/// Rows whose key has no side-store entry are dropped with a diagnostic.
pub fn reconstruct(
    merged: &MergedTable,
    sidecar: &Sidecar,
    classifier: &Classifier,
) -> Result<ReconstructOutput, MergeError> {
    let manifest = &sidecar.manifest;
    if manifest.source_names.is_empty() || manifest.source_names.len() > MAX_SOURCES {
        return Err(MergeError::SidecarMismatch {
            merge_id: manifest.merge_id.clone(),
            reason: format!("manifest lists {} sources", manifest.source_names.len()),
        });
    }

    let mut diagnostics = Vec::new();
    let (ids, prefix_len) = resolve_prefix(merged, sidecar, &mut diagnostics)?;
    let mut buckets: Vec<Vec<Vec<String>>> = vec![Vec::new(); manifest.source_names.len()];

    for keyed in keyed_rows(&merged.table, prefix_len) {
        let raw_row = &merged.table.rows[keyed.index];
        for (slot, value) in ids.values(raw_row).into_iter().enumerate() {
            if !value.is_empty() && manifest.source_names.get(slot) != Some(&value) {
                diagnostics.push(Diagnostic::UnknownIdentity {
                    row: keyed.index,
                    slot,
                    value,
                });
            }
        }

        let Some(entry) = sidecar.get(&keyed.key) else {
            warn!(row = keyed.index, key = %keyed.key, "no side-store entry, row dropped");
            diagnostics.push(Diagnostic::DroppedRow {
                row: keyed.index,
                key: keyed.key,
            });
            continue;
        };

        for slot in entry.present_slots() {
            let Some(bucket) = buckets.get_mut(slot) else {
                continue;
            };
            bucket.push(source_row(&keyed.prefix, entry, slot, classifier));
        }
        debug!(key = %keyed.key, slots = ?entry.present_slots().collect::<Vec<_>>(), "row restored");
    }

    let header: Vec<String> = if manifest.header.len() == prefix_len {
        manifest.header.clone()
    } else {
        merged.table.header.iter().take(prefix_len).cloned().collect()
    };

    let tables = buckets
        .into_iter()
        .enumerate()
        .filter(|(_, rows)| !rows.is_empty())
        .map(|(slot, rows)| {
            let metadata = match manifest.source_metadata.get(slot) {
                Some(lines) if !lines.is_empty() => lines.clone(),
                _ => merged.table.metadata.iter().map(|l| trim_trailing_empty(l)).collect(),
            };
            ReconstructedTable {
                slot,
                name: manifest.source_names[slot].clone(),
                table: Table {
                    metadata,
                    header: header.clone(),
                    rows,
                },
            }
        })
        .collect();

    Ok(ReconstructOutput { tables, diagnostics })
}

/// Split a merged table by its identity columns alone.
///
/// Every row goes to each slot whose identity cell is non-empty; tables are
/// named by the identity values.
pub fn reconstruct_without_sidecar(merged: &MergedTable) -> Result<ReconstructOutput, MergeError> {
    let ids = IdentityColumns::locate(&merged.table.header)?;
    let prefix_len = ids.start();
    let metadata: Vec<Vec<String>> = merged
        .table
        .metadata
        .iter()
        .map(|l| trim_trailing_empty(l))
        .collect();
    let header: Vec<String> = merged.table.header.iter().take(prefix_len).cloned().collect();

    let mut tables: Vec<ReconstructedTable> = Vec::new();
    for keyed in keyed_rows(&merged.table, prefix_len) {
        let raw_row = &merged.table.rows[keyed.index];
        for (slot, name) in ids.values(raw_row).into_iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            let pos = match tables.iter().position(|t| t.slot == slot && t.name == name) {
                Some(pos) => pos,
                None => {
                    tables.push(ReconstructedTable {
                        slot,
                        name,
                        table: Table {
                            metadata: metadata.clone(),
                            header: header.clone(),
                            rows: Vec::new(),
                        },
                    });
                    tables.len() - 1
                }
            };
            tables[pos].table.rows.push(keyed.prefix.clone());
        }
    }
    tables.sort_by_key(|t| t.slot);

    Ok(ReconstructOutput {
        tables,
        diagnostics: Vec::new(),
    })
}

/// Check the aggregation contract for every time-component row.
///
/// Returns the keys whose merged aggregate does not match their side-store
/// raw values under the recorded policy.
pub fn verify_round_trip(
    merged: &MergedTable,
    sidecar: &Sidecar,
) -> Result<Vec<RowKey>, MergeError> {
    let mut scratch = Vec::new();
    let (_, prefix_len) = resolve_prefix(merged, sidecar, &mut scratch)?;

    let mut violations = Vec::new();
    for keyed in keyed_rows(&merged.table, prefix_len) {
        let Some(entry) = sidecar.get(&keyed.key) else {
            continue;
        };
        let (Some(idx), Some(policy)) = (entry.value_index, entry.policy) else {
            continue;
        };

        let raw: Vec<f64> = entry
            .present_slots()
            .map(|slot| entry.raw_values.get(&slot).copied().unwrap_or(0.0))
            .collect();
        let expected = match policy {
            AggregationPolicy::Sum => raw.iter().sum::<f64>(),
            AggregationPolicy::Max => raw.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };

        let actual = keyed
            .prefix
            .get(idx)
            .and_then(|c| parse_number(c).as_number());
        let ok = match (actual, policy) {
            (Some(a), AggregationPolicy::Sum) => {
                (a - expected).abs() <= SUM_TOLERANCE * a.abs().max(expected.abs()).max(1.0)
            }
            (Some(a), AggregationPolicy::Max) => a == expected,
            (None, _) => false,
        };
        if !ok {
            debug!(key = %keyed.key, ?actual, expected, %policy, "aggregate mismatch");
            violations.push(keyed.key);
        }
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{MergeAggregator, MergeStamp};
    use crate::config::ClassifierConfig;
    use crate::model::{SourceMeta, SourceTable};

    fn line(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn header() -> Vec<String> {
        line(&["SAP-Arbeitsvorgang", "Art", "Text", "Einheit", "Wert"])
    }

    fn source(order: &str, rows: Vec<Vec<String>>) -> SourceTable {
        SourceTable {
            file_name: format!("{order}.csv"),
            meta: SourceMeta {
                order_id: order.into(),
                material_id: "M".into(),
                serial: "S".into(),
                routing: "AP".into(),
            },
            table: Table {
                metadata: vec![line(&["Fertigungsauftrag", order])],
                header: header(),
                rows,
            },
        }
    }

    fn merged_of(sources: Vec<SourceTable>) -> (MergedTable, Sidecar) {
        let classifier = Classifier::new(&ClassifierConfig::default());
        let mut agg = MergeAggregator::new(
            &classifier,
            MergeStamp {
                timestamp: "20260114_0930".into(),
                created_at: "2026-01-14T09:30:00.000".into(),
            },
        );
        for s in sources {
            agg.add_source(s);
        }
        let out = agg.finish().unwrap();
        (out.merged, out.sidecar)
    }

    fn classifier() -> Classifier {
        Classifier::new(&ClassifierConfig::default())
    }

    #[test]
    fn operation_number_padding() {
        assert_eq!(normalize_operation_number("50"), "0050");
        assert_eq!(normalize_operation_number("0010"), "0010");
        assert_eq!(normalize_operation_number("12345"), "12345");
        assert_eq!(normalize_operation_number("50a"), "50a");
        assert_eq!(normalize_operation_number(""), "");
    }

    #[test]
    fn locate_requires_all_six_columns() {
        let mut h = header();
        h.extend(IDENTITY_COLUMNS.iter().map(|c| c.to_string()));
        let err = IdentityColumns::locate(&h).unwrap_err();
        assert!(matches!(err, MergeError::MissingIdentityColumns { column } if column == "OriginalSAP_Fertigungsauftrag_1"));

        h.extend(ORIGINAL_OP_COLUMNS.iter().map(|c| c.to_string()));
        let ids = IdentityColumns::locate(&h).unwrap();
        assert_eq!(ids.start(), 5);
        assert_eq!(ids.order, [5, 6, 7]);
    }

    #[test]
    fn restores_raw_values_per_source() {
        let (merged, sidecar) = merged_of(vec![
            source("1", vec![line(&["0010", "Zeitanteil", "Ruesten", "min", "10"])]),
            source("2", vec![line(&["0010", "Zeitanteil", "Ruesten", "min", "15"])]),
        ]);
        assert_eq!(merged.table.rows[0][4], "25");

        let out = reconstruct(&merged, &sidecar, &classifier()).unwrap();
        assert!(out.diagnostics.is_empty());
        assert_eq!(out.tables.len(), 2);
        assert_eq!(out.tables[0].table.rows[0][4], "10");
        assert_eq!(out.tables[1].table.rows[0][4], "15");
        assert_eq!(out.tables[1].name, "2_M_S_20260114_0930");
        assert_eq!(out.tables[1].table.metadata, vec![line(&["Fertigungsauftrag", "2"])]);
        assert_eq!(out.tables[0].table.header, header());
    }

    #[test]
    fn operation_number_padded_on_output() {
        let (merged, sidecar) = merged_of(vec![source(
            "1",
            vec![line(&["50", "Normal", "Bohren", "", ""])],
        )]);
        let out = reconstruct(&merged, &sidecar, &classifier()).unwrap();
        assert_eq!(out.tables[0].table.rows[0][0], "0050");
    }

    #[test]
    fn divergent_cells_and_empty_values_restored() {
        let (merged, sidecar) = merged_of(vec![
            source("1", vec![line(&["0010", "Zeitanteil", "Ruesten", "min", "4"])]),
            source("2", vec![line(&["0010", "Zeitanteil", "ruesten", "min", ""])]),
        ]);
        assert_eq!(merged.table.rows.len(), 1);
        assert_eq!(merged.table.rows[0][4], "4");
        let out = reconstruct(&merged, &sidecar, &classifier()).unwrap();
        assert!(out.diagnostics.is_empty());
        assert_eq!(out.tables[0].table.rows[0][2], "Ruesten");
        assert_eq!(out.tables[0].table.rows[0][4], "4");
        assert_eq!(out.tables[1].table.rows[0][2], "ruesten");
        assert_eq!(out.tables[1].table.rows[0][4], "");
    }

    #[test]
    fn empty_value_before_first_number_restored() {
        let (merged, sidecar) = merged_of(vec![
            source("1", vec![line(&["0010", "Zeitanteil", "Ruesten", "min", ""])]),
            source("2", vec![line(&["0015", "Zeitanteil", "Ruesten", "min", "7"])]),
        ]);
        assert_eq!(merged.table.rows[0][4], "7");
        assert!(verify_round_trip(&merged, &sidecar).unwrap().is_empty());

        let out = reconstruct(&merged, &sidecar, &classifier()).unwrap();
        assert_eq!(out.tables[0].table.rows[0][0], "0010");
        assert_eq!(out.tables[0].table.rows[0][4], "");
        assert_eq!(out.tables[1].table.rows[0][0], "0015");
        assert_eq!(out.tables[1].table.rows[0][4], "7");
    }

    #[test]
    fn unknown_key_dropped() {
        let (mut merged, sidecar) = merged_of(vec![source(
            "1",
            vec![line(&["0010", "Normal", "Bohren", "", ""])],
        )]);
        let mut extra = merged.table.rows[0].clone();
        extra[2] = "Schweissen".into();
        merged.table.rows.push(extra);

        let out = reconstruct(&merged, &sidecar, &classifier()).unwrap();
        assert_eq!(out.tables[0].table.rows.len(), 1);
        assert!(matches!(&out.diagnostics[0], Diagnostic::DroppedRow { row: 1, .. }));
    }

    #[test]
    fn missing_identity_columns_fatal() {
        let (mut merged, sidecar) = merged_of(vec![source(
            "1",
            vec![line(&["0010", "Normal", "Bohren", "", ""])],
        )]);
        merged.table.header[6] = "Auftrag_2".into();
        let err = reconstruct(&merged, &sidecar, &classifier()).unwrap_err();
        assert!(matches!(err, MergeError::MissingIdentityColumns { .. }));
    }

    #[test]
    fn identity_only_mode_keeps_aggregates() {
        let (merged, _) = merged_of(vec![
            source("1", vec![line(&["0010", "Zeitanteil", "Ruesten", "min", "10"])]),
            source(
                "2",
                vec![
                    line(&["0010", "Zeitanteil", "Ruesten", "min", "15"]),
                    line(&["0020", "Normal", "Entgraten", "", ""]),
                ],
            ),
        ]);
        let out = reconstruct_without_sidecar(&merged).unwrap();
        assert_eq!(out.tables.len(), 2);
        assert_eq!(out.tables[0].name, "1_M_S_20260114_0930");
        assert_eq!(out.tables[0].table.rows.len(), 1);
        assert_eq!(out.tables[0].table.rows[0][4], "25");
        assert_eq!(out.tables[1].table.rows.len(), 2);
    }

    #[test]
    fn verify_flags_tampered_aggregate() {
        let (mut merged, sidecar) = merged_of(vec![
            source("1", vec![line(&["0010", "Zeitanteil", "Pruefen V0950", "min", "10"])]),
            source("2", vec![line(&["0010", "Zeitanteil", "Pruefen V0950", "min", "40"])]),
        ]);
        assert!(verify_round_trip(&merged, &sidecar).unwrap().is_empty());

        merged.table.rows[0][4] = "50".into();
        let bad = verify_round_trip(&merged, &sidecar).unwrap();
        assert_eq!(bad.len(), 1);
    }

    #[test]
    fn manifest_prefix_past_identity_columns_rejected() {
        let (merged, mut sidecar) = merged_of(vec![source(
            "1",
            vec![line(&["0010", "Normal", "Bohren", "", ""])],
        )]);
        sidecar.manifest.structural_prefix_len = 7;
        let err = reconstruct(&merged, &sidecar, &classifier()).unwrap_err();
        assert!(matches!(err, MergeError::SidecarMismatch { .. }));
    }
}
