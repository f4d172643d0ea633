// opmerge - merge per-order routing exports into one virtual export and back

mod exit_codes;
mod logging;
mod merge;
mod report;
mod settings;
mod unmerge;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_codes::EXIT_ERROR;
use merge::{cmd_merge, MergeArgs};
use report::BatchReport;
use settings::Settings;
use unmerge::{cmd_unmerge, UnmergeArgs};

#[derive(Parser)]
#[command(name = "opmerge")]
#[command(about = "Merge up to three order exports into one upload file, and split it again")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Settings file (default: per-user opmerge.toml, else built-in defaults)
    #[arg(long, global = true, env = "OPMERGE_CONFIG")]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the exports in the merge input directory
    #[command(after_help = "\
Examples:
  opmerge merge
  opmerge merge --input in/ --output out/ --keep-inputs
  opmerge merge --json | jq .merge_id")]
    Merge {
        /// Directory holding the source exports
        #[arg(long)]
        input: Option<PathBuf>,

        /// Directory the merged export is written to
        #[arg(long)]
        output: Option<PathBuf>,

        /// Leave consumed sources in place
        #[arg(long)]
        keep_inputs: bool,

        /// Print the batch report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Split merged exports back into one file per order
    #[command(after_help = "\
Examples:
  opmerge unmerge
  opmerge unmerge --merge-id 3f9a0c1be24d
  opmerge unmerge --without-sidecar")]
    Unmerge {
        /// Directory holding merged exports
        #[arg(long)]
        input: Option<PathBuf>,

        /// Directory reconstructed files are written to
        #[arg(long)]
        output: Option<PathBuf>,

        /// Use the side-store written by this merge run
        #[arg(long, conflicts_with = "without_sidecar")]
        merge_id: Option<String>,

        /// Split by identity columns only; values keep their aggregated form
        #[arg(long)]
        without_sidecar: bool,

        /// Leave merged inputs in place
        #[arg(long)]
        keep_inputs: bool,

        /// Print the batch report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the settings file, then print the resolved paths
    ValidateConfig,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  opmerge-recon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
        "\nsidecar_schema: 1",
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = Settings::load(cli.config.as_deref()).and_then(|settings| match cli.command {
        Commands::Merge {
            input,
            output,
            keep_inputs,
            json,
        } => cmd_merge(
            &settings,
            MergeArgs {
                input,
                output,
                keep_inputs,
            },
        )
        .and_then(|report| emit(&report, json)),
        Commands::Unmerge {
            input,
            output,
            merge_id,
            without_sidecar,
            keep_inputs,
            json,
        } => cmd_unmerge(
            &settings,
            UnmergeArgs {
                input,
                output,
                merge_id,
                without_sidecar,
                keep_inputs,
            },
        )
        .and_then(|report| emit(&report, json)),
        Commands::ValidateConfig => cmd_validate_config(&settings),
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

/// Print the report and pick the exit code. JSON goes to stdout alone.
fn emit(report: &BatchReport, json: bool) -> Result<u8, CliError> {
    if json {
        let text = report.to_json().map_err(|e| CliError {
            code: EXIT_ERROR,
            message: format!("cannot serialize report: {e}"),
            hint: None,
        })?;
        println!("{text}");
    } else {
        report.print_summary();
    }
    Ok(report.exit_code())
}

fn cmd_validate_config(settings: &Settings) -> Result<u8, CliError> {
    match &settings.source {
        Some(path) => println!("config:            {}", path.display()),
        None => println!("config:            (built-in defaults)"),
    }
    let format = &settings.engine.format;
    println!("delimiter:         {}", format.delimiter);
    println!("header_marker:     {}", format.header_marker);
    println!("metadata_lines:    {}", format.metadata_lines);
    println!(
        "max_code_range:    {}..={}",
        settings.engine.classifier.max_code_range[0],
        settings.engine.classifier.max_code_range[1]
    );

    let paths = &settings.paths;
    for (label, path) in [
        ("merge_input", &paths.merge_input),
        ("merge_output", &paths.merge_output),
        ("unmerge_input", &paths.unmerge_input),
        ("unmerge_output", &paths.unmerge_output),
        ("sidecar_dir", &paths.sidecar_dir),
        ("merge_done_file", &paths.merge_done_file),
        ("unmerge_done_file", &paths.unmerge_done_file),
    ] {
        println!("{:<18} {}", format!("{label}:"), settings.resolve(path).display());
    }
    println!(
        "delete_processed:  {}",
        settings.housekeeping.delete_processed
    );
    Ok(exit_codes::EXIT_SUCCESS)
}
