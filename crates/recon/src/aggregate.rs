use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::classify::{format_value, parse_number, Classifier, RowKind};
use crate::error::MergeError;
use crate::key::{derive_key, KeyOccurrences, RowKey};
use crate::model::{
    AggregationBucket, Diagnostic, MergedTable, Slot, SourceTable, Table, IDENTITY_COLUMNS,
    MAX_SOURCES, ORIGINAL_OP_COLUMNS,
};
use crate::sidecar::{merge_id, MergeManifest, Sidecar, SidecarBuilder, SIDECAR_SCHEMA_VERSION};

/// Clock values stamped into one merge run.
#[derive(Debug, Clone)]
pub struct MergeStamp {
    /// Short timestamp embedded in reconstruction names.
    pub timestamp: String,
    /// Full-precision creation time; also feeds the merge id.
    pub created_at: String,
}

/// Accepted source, in slot order.
#[derive(Debug, Clone)]
struct SlotInfo {
    file_name: String,
    order_id: String,
    name: String,
    metadata: Vec<Vec<String>>,
}

/// Per-key state: structural exemplar, presence, time aggregate.
#[derive(Debug)]
struct KeyGroup {
    template: Vec<String>,
    presence: [bool; MAX_SOURCES],
    bucket: Option<AggregationBucket>,
}

/// Result of one merge run.
#[derive(Debug)]
pub struct MergeOutput {
    pub merged: MergedTable,
    pub sidecar: Sidecar,
    /// Accepted source file names, slot order.
    pub consumed: Vec<String>,
    /// Order ids of the accepted sources, slot order.
    pub order_ids: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Single-run merge state. Feed sources with [`add_source`], then
/// [`finish`].
///
/// [`add_source`]: MergeAggregator::add_source
/// [`finish`]: MergeAggregator::finish
pub struct MergeAggregator<'a> {
    classifier: &'a Classifier,
    stamp: MergeStamp,
    header: Vec<String>,
    metadata: Vec<Vec<String>>,
    slots: Vec<SlotInfo>,
    order: Vec<RowKey>,
    groups: HashMap<RowKey, KeyGroup>,
    sidecar: SidecarBuilder,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> MergeAggregator<'a> {
    pub fn new(classifier: &'a Classifier, stamp: MergeStamp) -> Self {
        Self {
            classifier,
            stamp,
            header: Vec::new(),
            metadata: Vec::new(),
            slots: Vec::new(),
            order: Vec::new(),
            groups: HashMap::new(),
            sidecar: SidecarBuilder::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Width of the structural prefix, fixed by the first accepted source.
    pub fn prefix_len(&self) -> usize {
        self.header.len()
    }

    /// Record a skip the caller detected before the source could be parsed.
    pub fn note(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Ingest one source. Returns its slot, or `None` if all slots are taken.
    pub fn add_source(&mut self, source: SourceTable) -> Option<Slot> {
        if self.slots.len() >= MAX_SOURCES {
            warn!(file = %source.file_name, "more than {MAX_SOURCES} sources, skipping");
            self.diagnostics.push(Diagnostic::TooManySources {
                file: source.file_name,
            });
            return None;
        }

        let slot = self.slots.len();
        if slot == 0 {
            self.header = source.table.header.clone();
            self.metadata = source.table.metadata.clone();
        } else if source.table.header.len() != self.header.len() {
            warn!(
                file = %source.file_name,
                expected = self.header.len(),
                found = source.table.header.len(),
                "header width differs from first source"
            );
            self.diagnostics.push(Diagnostic::HeaderMismatch {
                file: source.file_name.clone(),
                expected: self.header.len(),
                found: source.table.header.len(),
            });
        }

        let width = self.prefix_len();
        let mut occurrences = KeyOccurrences::new();

        for (row_idx, mut row) in source.table.rows.into_iter().enumerate() {
            let dropped = crate::table::fit_row(&mut row, width);
            if dropped > 0 {
                warn!(file = %source.file_name, row = row_idx, dropped, "cells beyond header width");
                self.diagnostics.push(Diagnostic::TruncatedCells {
                    file: source.file_name.clone(),
                    row: row_idx,
                    dropped,
                });
            }

            let key = occurrences.qualify(derive_key(&row, width));
            self.ingest_row(slot, key, row);
        }

        self.slots.push(SlotInfo {
            file_name: source.file_name,
            order_id: source.meta.order_id.clone(),
            name: source.meta.reconstruction_name(&self.stamp.timestamp),
            metadata: source.table.metadata,
        });
        Some(slot)
    }

    fn ingest_row(&mut self, slot: Slot, key: RowKey, row: Vec<String>) {
        let kind = self.classifier.row_kind(&row);

        if !self.groups.contains_key(&key) {
            self.order.push(key.clone());
        }
        let group = self.groups.entry(key.clone()).or_insert_with(|| KeyGroup {
            template: row.clone(),
            presence: [false; MAX_SOURCES],
            bucket: None,
        });
        group.presence[slot] = true;
        self.sidecar.record_presence(&key, slot);

        // the bucket's value index, once set, holds for every later row
        let value_index = match (&group.bucket, kind) {
            (Some(b), _) => Some(b.value_index),
            (None, RowKind::TimeComponent) => self.classifier.value_index(&row),
            (None, RowKind::Ordinary) => None,
        };

        if let Some(idx) = value_index.filter(|_| kind == RowKind::TimeComponent) {
            let cell = row.get(idx).map(String::as_str).unwrap_or("");
            let raw = parse_number(cell).as_number();
            let code = self.classifier.characteristic_code(&row);
            let max_coded = code.as_ref().is_some_and(|c| self.classifier.is_max_code(c));

            let opened = group.bucket.is_none();
            let bucket = group.bucket.get_or_insert_with(|| AggregationBucket::new(idx));
            if opened {
                // earlier sources had no numeric value here; their cells still
                // have to come back on reconstruction
                for earlier in (0..slot).filter(|&s| group.presence[s]) {
                    let earlier_cell = self
                        .sidecar
                        .divergent_cell(&key, earlier, idx)
                        .or_else(|| group.template.get(idx).map(String::as_str))
                        .unwrap_or("")
                        .to_string();
                    let earlier_raw = parse_number(&earlier_cell).as_number();
                    bucket.add(earlier_raw.unwrap_or(0.0), max_coded);
                    self.sidecar.record_time(
                        &key,
                        earlier,
                        code.as_ref(),
                        idx,
                        earlier_raw,
                        &earlier_cell,
                    );
                }
            }
            if bucket.code.is_none() {
                bucket.code = code.clone();
            }
            bucket.add(raw.unwrap_or(0.0), max_coded);
            debug!(%key, slot, value = ?raw, policy = %bucket.policy(), "time contribution");

            self.sidecar
                .record_time(&key, slot, code.as_ref(), idx, raw, cell);
        }

        let skip = group.bucket.as_ref().map(|b| b.value_index);
        let divergent: BTreeMap<usize, String> = row
            .iter()
            .zip(group.template.iter())
            .enumerate()
            .filter(|(i, (cell, tmpl))| Some(*i) != skip && cell != tmpl)
            .map(|(i, (cell, _))| (i, cell.clone()))
            .collect();
        self.sidecar.record_divergent(&key, slot, divergent);
    }

    /// Emit merged rows in first-seen key order and seal the side-store.
    ///
    /// The merged table takes the first accepted source's file name.
    pub fn finish(self) -> Result<MergeOutput, MergeError> {
        let Some(first) = self.slots.first() else {
            let skipped = self.diagnostics.len();
            return Err(MergeError::NoUsableSources { skipped });
        };
        let output_filename = first.file_name.clone();

        let Self {
            header,
            metadata,
            slots,
            order,
            mut groups,
            mut sidecar,
            diagnostics,
            stamp,
            ..
        } = self;

        let width = header.len();
        let mut final_header = header.clone();
        final_header.extend(IDENTITY_COLUMNS.iter().map(|c| c.to_string()));
        final_header.extend(ORIGINAL_OP_COLUMNS.iter().map(|c| c.to_string()));

        let mut rows = Vec::with_capacity(order.len());
        for key in &order {
            let Some(group) = groups.remove(key) else {
                continue;
            };
            let mut row = group.template;

            if let Some(bucket) = &group.bucket {
                if let Some(cell) = row.get_mut(bucket.value_index) {
                    *cell = format_value(bucket.result());
                }
                sidecar.set_policy(key, bucket.policy());
            }

            for (slot, present) in group.presence.iter().enumerate() {
                let name = match (present, slots.get(slot)) {
                    (true, Some(info)) => info.name.clone(),
                    _ => String::new(),
                };
                row.push(name);
            }
            row.extend(std::iter::repeat(String::new()).take(ORIGINAL_OP_COLUMNS.len()));
            rows.push(row);
        }

        let total = final_header.len();
        let metadata: Vec<Vec<String>> = metadata
            .into_iter()
            .map(|mut line| {
                if line.len() < total {
                    line.resize(total, String::new());
                }
                line
            })
            .collect();

        let source_files: Vec<String> = slots.iter().map(|s| s.file_name.clone()).collect();
        let manifest = MergeManifest {
            schema_version: SIDECAR_SCHEMA_VERSION,
            merge_id: merge_id(&source_files, &stamp.created_at),
            created_at: stamp.created_at,
            output_filename: output_filename.clone(),
            structural_prefix_len: width,
            header,
            source_files: source_files.clone(),
            source_names: slots.iter().map(|s| s.name.clone()).collect(),
            source_metadata: slots.iter().map(|s| s.metadata.clone()).collect(),
        };

        Ok(MergeOutput {
            merged: MergedTable {
                file_name: output_filename,
                table: Table {
                    metadata,
                    header: final_header,
                    rows,
                },
            },
            sidecar: sidecar.build(manifest),
            consumed: source_files,
            order_ids: slots.into_iter().map(|s| s.order_id).collect(),
            diagnostics,
        })
    }
}
