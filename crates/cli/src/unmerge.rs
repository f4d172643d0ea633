//! `opmerge unmerge`: split returned merged tables back into per-order files.

use std::path::{Path, PathBuf};

use opmerge_io::csv::{read_export, write_table};
use opmerge_io::fsutil::{list_csv_files, remove_processed, sanitize_file_name, write_durable};
use opmerge_io::{IoError, SidecarStore};
use opmerge_recon::reconstruct::identity_values;
use opmerge_recon::{
    read_merged, unmerge_table, verify_round_trip, MergeError, ReconstructMode, Sidecar,
};
use tracing::{info, warn};

use crate::exit_codes::{EXIT_ERROR, EXIT_OUTPUT_IO};
use crate::report::{BatchReport, FileReport};
use crate::settings::Settings;
use crate::CliError;

pub struct UnmergeArgs {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub merge_id: Option<String>,
    pub without_sidecar: bool,
    pub keep_inputs: bool,
}

impl UnmergeArgs {
    fn mode(&self) -> ReconstructMode {
        if self.without_sidecar {
            ReconstructMode::IdentityColumnsOnly
        } else {
            ReconstructMode::Sidecar
        }
    }
}

/// Why one merged file could not be split. Output failures abort the batch;
/// everything else only fails that file.
enum FileError {
    Input(String),
    Output(IoError),
}

impl From<MergeError> for FileError {
    fn from(e: MergeError) -> Self {
        FileError::Input(e.to_string())
    }
}

struct Split {
    names: Vec<String>,
    report: FileReport,
}

pub fn cmd_unmerge(settings: &Settings, args: UnmergeArgs) -> Result<BatchReport, CliError> {
    let input_dir =
        settings.resolve(args.input.as_deref().unwrap_or(&settings.paths.unmerge_input));
    let output_dir =
        settings.resolve(args.output.as_deref().unwrap_or(&settings.paths.unmerge_output));
    let store = SidecarStore::new(settings.resolve(&settings.paths.sidecar_dir));

    let paths = list_csv_files(&input_dir).map_err(|e| CliError {
        code: EXIT_ERROR,
        message: e.to_string(),
        hint: None,
    })?;
    info!(dir = %input_dir.display(), files = paths.len(), mode = %args.mode(), "unmerge input");

    let mut report = BatchReport::new("unmerge");
    report.merge_id = args.merge_id.clone();
    let mut reconstructed: Vec<String> = Vec::new();
    let mut processed: Vec<PathBuf> = Vec::new();

    for path in &paths {
        match split_one(settings, &store, &output_dir, path, &args) {
            Ok(split) => {
                reconstructed.extend(split.names);
                report.push(split.report);
                processed.push(path.clone());
            }
            Err(FileError::Input(reason)) => {
                warn!(path = %path.display(), %reason, "merged file not split");
                report.push(FileReport::failed(file_label(path), reason));
            }
            Err(FileError::Output(e)) => {
                return Err(CliError {
                    code: EXIT_OUTPUT_IO,
                    message: e.to_string(),
                    hint: None,
                })
            }
        }
    }

    let done_path = settings.resolve(&settings.paths.unmerge_done_file);
    write_durable(&done_path, reconstructed.join("\n").as_bytes()).map_err(|e| CliError {
        code: EXIT_OUTPUT_IO,
        message: e.to_string(),
        hint: None,
    })?;

    if settings.housekeeping.delete_processed && !args.keep_inputs {
        for path in &processed {
            remove_processed(path);
        }
    }
    Ok(report)
}

fn split_one(
    settings: &Settings,
    store: &SidecarStore,
    output_dir: &Path,
    path: &Path,
    args: &UnmergeArgs,
) -> Result<Split, FileError> {
    let engine = &settings.engine;
    let raw = read_export(path, &engine.format).map_err(|e| FileError::Input(e.to_string()))?;
    let merged = read_merged(engine, raw)?;
    let mut report = FileReport::success(merged.file_name.clone());

    let sidecar: Option<Sidecar> = match args.mode() {
        ReconstructMode::IdentityColumnsOnly => None,
        ReconstructMode::Sidecar => {
            let sidecar = match &args.merge_id {
                Some(id) => store.load_by_id(&merged.file_name, id),
                None => {
                    let identities = identity_values(&merged)?;
                    store
                        .find_latest(&merged.file_name, &identities)
                        .map(|(_, sidecar)| sidecar)
                }
            }
            .map_err(|e| FileError::Input(e.to_string()))?;

            for key in verify_round_trip(&merged, &sidecar)? {
                report
                    .warnings
                    .push(format!("aggregate for '{key}' no longer matches side-store values"));
            }
            Some(sidecar)
        }
    };

    let out = unmerge_table(engine, &merged, sidecar.as_ref(), args.mode())?;
    report
        .warnings
        .extend(out.diagnostics.iter().map(|d| d.to_string()));

    let mut names = Vec::with_capacity(out.tables.len());
    for table in &out.tables {
        let file_name = format!("{}.csv", sanitize_file_name(&table.name));
        let target = output_dir.join(&file_name);
        write_table(&target, &table.table, &engine.format).map_err(FileError::Output)?;
        info!(slot = table.slot, rows = table.table.rows.len(), path = %target.display(), "source restored");
        names.push(table.name.clone());
        report.outputs.push(file_name);
    }

    Ok(Split { names, report })
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
