//! Side-store: the recovery record written next to every merged table.
//!
//! One JSON document per merge holds the [`MergeManifest`] and one
//! [`SidecarEntry`] per row key. Every key has an entry with its presence
//! map; time-component keys additionally carry code, value index, policy
//! and the raw per-source values.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::classify::CharacteristicCode;
use crate::error::MergeError;
use crate::key::RowKey;
use crate::model::{AggregationPolicy, Slot};

/// Bump when the document layout changes incompatibly.
pub const SIDECAR_SCHEMA_VERSION: u32 = 1;

/// File name suffix of persisted side-stores.
pub const SIDECAR_SUFFIX: &str = ".sidecar.json";

/// Length of the hex merge identifier.
pub const MERGE_ID_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeManifest {
    pub schema_version: u32,
    pub merge_id: String,
    pub created_at: String,
    pub output_filename: String,
    pub structural_prefix_len: usize,
    pub header: Vec<String>,
    /// Original file names, slot order.
    pub source_files: Vec<String>,
    /// Reconstruction names, slot order.
    pub source_names: Vec<String>,
    /// Each source's own metadata lines, slot order.
    #[serde(default)]
    pub source_metadata: Vec<Vec<Vec<String>>>,
}

/// Short BLAKE3 digest of the source file names and the run timestamp.
pub fn merge_id(source_files: &[String], timestamp: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for name in source_files {
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(timestamp.as_bytes());
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..MERGE_ID_LEN].to_string()
}

/// True for strings [`merge_id`] can produce: lowercase hex of the fixed length.
pub fn is_merge_id(s: &str) -> bool {
    s.len() == MERGE_ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// File stem used for side-store lookup: the output name without `.csv`.
pub fn output_stem(output_filename: &str) -> &str {
    let lower = output_filename.to_ascii_lowercase();
    if lower.ends_with(".csv") {
        &output_filename[..output_filename.len() - 4]
    } else {
        output_filename
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SidecarEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CharacteristicCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<AggregationPolicy>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw_values: BTreeMap<Slot, f64>,
    /// Original text of value cells that did not parse as numbers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw_text: BTreeMap<Slot, String>,
    pub presence: BTreeMap<Slot, bool>,
    /// Cells of a source's row that differ from the merged template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub divergent: BTreeMap<Slot, BTreeMap<usize, String>>,
}

impl SidecarEntry {
    pub fn is_present(&self, slot: Slot) -> bool {
        self.presence.get(&slot).copied().unwrap_or(false)
    }

    pub fn present_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.presence
            .iter()
            .filter(|(_, present)| **present)
            .map(|(slot, _)| *slot)
    }

    pub fn is_time_component(&self) -> bool {
        self.value_index.is_some()
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub manifest: MergeManifest,
    pub entries: BTreeMap<RowKey, SidecarEntry>,
}

impl Sidecar {
    /// `<stem>.<merge-id>.sidecar.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}.{}{SIDECAR_SUFFIX}",
            output_stem(&self.manifest.output_filename),
            self.manifest.merge_id
        )
    }

    pub fn to_json(&self) -> Result<String, MergeError> {
        serde_json::to_string_pretty(self).map_err(|e| MergeError::SidecarDecode(e.to_string()))
    }

    /// Decode a document, rejecting other schema versions before the full
    /// parse so layout changes surface as a version error.
    pub fn from_json(input: &str) -> Result<Self, MergeError> {
        #[derive(Deserialize)]
        struct VersionProbe {
            manifest: ManifestProbe,
        }
        #[derive(Deserialize)]
        struct ManifestProbe {
            schema_version: u32,
        }

        let probe: VersionProbe =
            serde_json::from_str(input).map_err(|e| MergeError::SidecarDecode(e.to_string()))?;
        if probe.manifest.schema_version != SIDECAR_SCHEMA_VERSION {
            return Err(MergeError::UnsupportedSchema {
                found: probe.manifest.schema_version,
                expected: SIDECAR_SCHEMA_VERSION,
            });
        }

        serde_json::from_str(input).map_err(|e| MergeError::SidecarDecode(e.to_string()))
    }

    pub fn get(&self, key: &RowKey) -> Option<&SidecarEntry> {
        self.entries.get(key)
    }

    /// True when every non-empty identity value names one of this merge's
    /// sources in its own slot.
    pub fn matches_identities(&self, identities: &[Vec<String>]) -> bool {
        identities.iter().all(|row| {
            row.iter().enumerate().all(|(slot, value)| {
                value.is_empty() || self.manifest.source_names.get(slot) == Some(value)
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects per-key recovery data while the aggregator runs.
#[derive(Debug, Default)]
pub struct SidecarBuilder {
    entries: HashMap<RowKey, SidecarEntry>,
}

impl SidecarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, key: &RowKey) -> &mut SidecarEntry {
        self.entries.entry(key.clone()).or_default()
    }

    pub fn record_presence(&mut self, key: &RowKey, slot: Slot) {
        self.entry(key).presence.insert(slot, true);
    }

    /// First code and value index seen for a key are kept.
    pub fn record_time(
        &mut self,
        key: &RowKey,
        slot: Slot,
        code: Option<&CharacteristicCode>,
        value_index: usize,
        raw: Option<f64>,
        raw_text: &str,
    ) {
        let entry = self.entry(key);
        if entry.code.is_none() {
            entry.code = code.cloned();
        }
        if entry.value_index.is_none() {
            entry.value_index = Some(value_index);
        }
        match raw {
            Some(v) => {
                entry.raw_values.insert(slot, v);
            }
            None => {
                entry.raw_text.insert(slot, raw_text.to_string());
            }
        }
    }

    pub fn record_divergent(&mut self, key: &RowKey, slot: Slot, cells: BTreeMap<usize, String>) {
        if !cells.is_empty() {
            self.entry(key).divergent.insert(slot, cells);
        }
    }

    /// Cell `idx` as recorded for a slot whose row differed from the template.
    pub fn divergent_cell(&self, key: &RowKey, slot: Slot, idx: usize) -> Option<&str> {
        self.entries
            .get(key)?
            .divergent
            .get(&slot)?
            .get(&idx)
            .map(String::as_str)
    }

    pub fn set_policy(&mut self, key: &RowKey, policy: AggregationPolicy) {
        self.entry(key).policy = Some(policy);
    }

    /// Fill absent slots with explicit `false` and seal the document.
    pub fn build(self, manifest: MergeManifest) -> Sidecar {
        let slots = manifest.source_names.len();
        let entries = self
            .entries
            .into_iter()
            .map(|(key, mut entry)| {
                for slot in 0..slots {
                    entry.presence.entry(slot).or_insert(false);
                }
                (key, entry)
            })
            .collect();
        Sidecar { manifest, entries }
    }
}
