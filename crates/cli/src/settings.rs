//! `opmerge.toml`: engine sections plus directories and housekeeping.

use std::path::{Path, PathBuf};

use opmerge_recon::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::exit_codes::EXIT_USAGE;
use crate::CliError;

/// File name looked up in the per-user config directory.
pub const CONFIG_FILE_NAME: &str = "opmerge.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub merge_input: PathBuf,
    pub merge_output: PathBuf,
    pub unmerge_input: PathBuf,
    pub unmerge_output: PathBuf,
    pub sidecar_dir: PathBuf,
    pub merge_done_file: PathBuf,
    pub unmerge_done_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            merge_input: "10_createVirtualCSV".into(),
            merge_output: "20_VirtualCSVToSQL".into(),
            unmerge_input: "30_unmergeVirtualCSV".into(),
            unmerge_output: "40_unmergedCSVs".into(),
            sidecar_dir: "temp/sidecars".into(),
            merge_done_file: "temp/done.txt".into(),
            unmerge_done_file: "temp/unmergeDone.txt".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HousekeepingConfig {
    /// Delete inputs once their outputs are durable.
    pub delete_processed: bool,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            delete_processed: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(flatten)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// File the settings came from; `None` for built-in defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// `<config dir>/opmerge/opmerge.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("opmerge").join(CONFIG_FILE_NAME))
}

fn config_err(msg: impl Into<String>) -> CliError {
    CliError {
        code: EXIT_USAGE,
        message: msg.into(),
        hint: None,
    }
}

impl Settings {
    /// Parse and validate a settings document. Relative paths resolve
    /// against `base_dir`.
    pub fn from_toml(input: &str, base_dir: &Path) -> Result<Self, CliError> {
        let mut settings: Settings =
            toml::from_str(input).map_err(|e| config_err(format!("config parse error: {e}")))?;
        settings
            .engine
            .validate()
            .map_err(|e| config_err(e.to_string()))?;
        settings.base_dir = base_dir.to_path_buf();
        Ok(settings)
    }

    /// Load from `explicit` (flag or `$OPMERGE_CONFIG`), else the per-user
    /// config file, else built-in defaults rooted at the working directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CliError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.is_file()),
        };

        let Some(path) = path else {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            return Ok(Settings {
                base_dir: cwd,
                ..Settings::default()
            });
        };

        let text = std::fs::read_to_string(&path).map_err(|e| CliError {
            code: EXIT_USAGE,
            message: format!("cannot read config {}: {e}", path.display()),
            hint: Some("pass --config or set OPMERGE_CONFIG to an existing file".into()),
        })?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut settings = Self::from_toml(&text, &base)?;
        settings.source = Some(path);
        Ok(settings)
    }

    /// Resolve a configured or user-supplied path against `base_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}
