use tracing::{info, warn};

use crate::aggregate::{MergeAggregator, MergeOutput, MergeStamp};
use crate::classify::Classifier;
use crate::config::EngineConfig;
use crate::error::MergeError;
use crate::model::{Diagnostic, MergedTable, SourceTable};
use crate::reconstruct::{
    reconstruct, reconstruct_without_sidecar, ReconstructMode, ReconstructOutput,
};
use crate::sidecar::Sidecar;

/// One delimited file, already decoded and split into cells.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub file_name: String,
    pub lines: Vec<Vec<String>>,
}

/// Merge up to three exports into one virtual export plus side-store.
///
/// Files without a structural header are skipped; files past the third
/// usable one are skipped. Both are reported as diagnostics.
pub fn merge(
    config: &EngineConfig,
    files: Vec<RawFile>,
    stamp: MergeStamp,
) -> Result<MergeOutput, MergeError> {
    config.validate()?;
    let classifier = Classifier::new(&config.classifier);
    let mut aggregator = MergeAggregator::new(&classifier, stamp);

    for file in files {
        let Some(source) = SourceTable::from_lines(&file.file_name, file.lines, &config.format)
        else {
            warn!(file = %file.file_name, "no structural header row, skipping");
            aggregator.note(Diagnostic::MissingHeaderMarker {
                file: file.file_name,
            });
            continue;
        };

        let rows = source.table.rows.len();
        let name = source.file_name.clone();
        if let Some(slot) = aggregator.add_source(source) {
            info!(file = %name, slot, rows, "source accepted");
        }
    }

    aggregator.finish()
}

/// Parse a decoded merged export.
pub fn read_merged(config: &EngineConfig, file: RawFile) -> Result<MergedTable, MergeError> {
    MergedTable::from_lines(&file.file_name, file.lines, &config.format)
}

/// Split a merged export back into its sources.
///
/// `sidecar` is required in [`ReconstructMode::Sidecar`] and ignored in
/// [`ReconstructMode::IdentityColumnsOnly`].
pub fn unmerge(
    config: &EngineConfig,
    file: RawFile,
    sidecar: Option<&Sidecar>,
    mode: ReconstructMode,
) -> Result<ReconstructOutput, MergeError> {
    config.validate()?;
    let merged = read_merged(config, file)?;
    unmerge_table(config, &merged, sidecar, mode)
}

/// [`unmerge`] for a table that is already parsed, e.g. one whose identity
/// columns were needed to pick the side-store.
pub fn unmerge_table(
    config: &EngineConfig,
    merged: &MergedTable,
    sidecar: Option<&Sidecar>,
    mode: ReconstructMode,
) -> Result<ReconstructOutput, MergeError> {
    let out = match (mode, sidecar) {
        (ReconstructMode::Sidecar, Some(sidecar)) => {
            let classifier = Classifier::new(&config.classifier);
            reconstruct(merged, sidecar, &classifier)?
        }
        (ReconstructMode::Sidecar, None) => {
            return Err(MergeError::SidecarMismatch {
                merge_id: String::new(),
                reason: format!("no side-store supplied for {}", merged.file_name),
            })
        }
        (ReconstructMode::IdentityColumnsOnly, _) => reconstruct_without_sidecar(merged)?,
    };

    info!(
        file = %merged.file_name,
        %mode,
        tables = out.tables.len(),
        diagnostics = out.diagnostics.len(),
        "merged table split"
    );
    Ok(out)
}
