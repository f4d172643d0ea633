//! `opmerge merge`: combine the exports waiting in the merge input directory.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, SecondsFormat};
use opmerge_io::csv::{read_export, write_table};
use opmerge_io::fsutil::{list_csv_files, remove_processed, write_durable};
use opmerge_io::SidecarStore;
use opmerge_recon::{Diagnostic, MergeError, MergeStamp, RawFile};
use tracing::{info, warn};

use crate::exit_codes::{EXIT_ERROR, EXIT_NO_SOURCES, EXIT_OUTPUT_IO, EXIT_USAGE};
use crate::report::{BatchReport, FileReport};
use crate::settings::Settings;
use crate::CliError;

pub struct MergeArgs {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub keep_inputs: bool,
}

fn merge_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError {
        code,
        message: msg.into(),
        hint: None,
    }
}

/// Build the run stamp. An unusable `timestamp_format` is a config error
/// rather than a panic inside chrono's `Display`.
pub fn stamp_for(now: DateTime<Local>, timestamp_format: &str) -> Result<MergeStamp, CliError> {
    let mut timestamp = String::new();
    write!(timestamp, "{}", now.format(timestamp_format)).map_err(|_| {
        merge_err(
            EXIT_USAGE,
            format!("invalid timestamp_format '{timestamp_format}'"),
        )
    })?;
    Ok(MergeStamp {
        timestamp,
        created_at: now.to_rfc3339_opts(SecondsFormat::Micros, false),
    })
}

pub fn cmd_merge(settings: &Settings, args: MergeArgs) -> Result<BatchReport, CliError> {
    let input_dir = settings.resolve(args.input.as_deref().unwrap_or(&settings.paths.merge_input));
    let output_dir =
        settings.resolve(args.output.as_deref().unwrap_or(&settings.paths.merge_output));
    let format = &settings.engine.format;

    let paths = list_csv_files(&input_dir).map_err(|e| merge_err(EXIT_ERROR, e.to_string()))?;
    info!(dir = %input_dir.display(), files = paths.len(), "merge input");

    let mut report = BatchReport::new("merge");
    let mut files: Vec<RawFile> = Vec::new();
    for path in &paths {
        match read_export(path, format) {
            Ok(file) => files.push(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable source");
                report.push(FileReport::failed(file_label(path), e.to_string()));
            }
        }
    }

    let stamp = stamp_for(Local::now(), &format.timestamp_format)?;
    let out = match opmerge_recon::merge(&settings.engine, files, stamp) {
        Ok(out) => out,
        Err(MergeError::NoUsableSources { skipped }) => {
            return Err(CliError {
                code: EXIT_NO_SOURCES,
                message: format!(
                    "no usable source tables in {} ({skipped} skipped)",
                    input_dir.display()
                ),
                hint: Some(format!(
                    "sources need a header row starting with '{}'",
                    format.header_marker
                )),
            });
        }
        Err(e @ (MergeError::ConfigParse(_) | MergeError::ConfigValidation(_))) => {
            return Err(merge_err(EXIT_USAGE, e.to_string()))
        }
        Err(e) => return Err(merge_err(EXIT_ERROR, e.to_string())),
    };

    // side-store, merged table, done file; inputs are deleted last
    let store = SidecarStore::new(settings.resolve(&settings.paths.sidecar_dir));
    let sidecar_path = store
        .save(&out.sidecar)
        .map_err(|e| merge_err(EXIT_OUTPUT_IO, e.to_string()))?;
    let merged_path = output_dir.join(&out.merged.file_name);
    write_table(&merged_path, &out.merged.table, format)
        .map_err(|e| merge_err(EXIT_OUTPUT_IO, e.to_string()))?;
    let done_path = settings.resolve(&settings.paths.merge_done_file);
    write_durable(&done_path, out.order_ids.join("\n").as_bytes())
        .map_err(|e| merge_err(EXIT_OUTPUT_IO, e.to_string()))?;

    info!(
        merged = %merged_path.display(),
        sidecar = %sidecar_path.display(),
        merge_id = %out.sidecar.manifest.merge_id,
        sources = out.consumed.len(),
        "merge written"
    );

    let mut warnings: Vec<String> = Vec::new();
    for diagnostic in &out.diagnostics {
        match diagnostic {
            Diagnostic::MissingHeaderMarker { file } | Diagnostic::TooManySources { file } => {
                report.push(FileReport::skipped(file.clone(), diagnostic.to_string()));
            }
            other => warnings.push(other.to_string()),
        }
    }

    let delete = settings.housekeeping.delete_processed && !args.keep_inputs;
    for name in &out.consumed {
        let mut entry = FileReport::success(name.clone());
        entry.outputs.push(out.merged.file_name.clone());
        entry.warnings = warnings
            .iter()
            .filter(|w| w.starts_with(name.as_str()))
            .cloned()
            .collect();
        if delete {
            remove_processed(&input_dir.join(name));
        }
        report.push(entry);
    }

    report.merge_id = Some(out.sidecar.manifest.merge_id.clone());
    Ok(report)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stamp_uses_configured_format() {
        let now = Local.with_ymd_and_hms(2026, 1, 14, 9, 30, 5).unwrap();
        let stamp = stamp_for(now, "%Y%m%d_%H%M").unwrap();
        assert_eq!(stamp.timestamp, "20260114_0930");
        assert!(stamp.created_at.starts_with("2026-01-14T09:30:05.000000"));
    }

    #[test]
    fn bad_timestamp_format_is_usage_error() {
        let now = Local.with_ymd_and_hms(2026, 1, 14, 9, 30, 0).unwrap();
        let err = stamp_for(now, "%Y%m%").unwrap_err();
        assert_eq!(err.code, EXIT_USAGE);
    }
}
