use serde::{Deserialize, Serialize};

use crate::error::MergeError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Engine-facing configuration: file layout and row classification.
///
/// Housekeeping settings (directories, deletion) live with the CLI; this
/// struct only carries what changes merge/unmerge semantics.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatConfig {
    /// Field delimiter, single ASCII character.
    pub delimiter: char,
    /// Prefix of the first cell of the structural header row.
    pub header_marker: String,
    /// Number of key/value metadata lines at the top of every export.
    pub metadata_lines: usize,
    /// Encoding label used when an input file is not valid UTF-8.
    pub input_encoding: String,
    /// Encoding label for every file written.
    pub output_encoding: String,
    /// chrono format for the timestamp embedded in reconstruction names.
    pub timestamp_format: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            delimiter: ';',
            header_marker: "SAP-Arbeitsvorgang".into(),
            metadata_lines: 4,
            input_encoding: "windows-1252".into(),
            output_encoding: "utf-8".into(),
            timestamp_format: "%Y%m%d_%H%M".into(),
        }
    }
}

impl FormatConfig {
    /// Delimiter as the byte the csv crate expects.
    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees ASCII
        self.delimiter as u8
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Cell text (case-insensitive) that marks a time-component row.
    pub time_marker: String,
    /// Unit tokens that may precede the value cell.
    pub time_units: Vec<String>,
    /// Inclusive code class range whose rows aggregate by max instead of sum.
    pub max_code_range: [u16; 2],
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            time_marker: "zeitanteil".into(),
            time_units: ["min", "h", "std", "s", "sek", "sec", "tag"]
                .iter()
                .map(|u| u.to_string())
                .collect(),
            max_code_range: [900, 999],
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, MergeError> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| MergeError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MergeError> {
        let f = &self.format;
        if !f.delimiter.is_ascii() || f.delimiter.is_ascii_alphanumeric() || f.delimiter == '"' {
            return Err(MergeError::ConfigValidation(format!(
                "delimiter must be a single ASCII punctuation or whitespace character, got {:?}",
                f.delimiter
            )));
        }
        if f.metadata_lines == 0 {
            return Err(MergeError::ConfigValidation(
                "metadata_lines must be at least 1".into(),
            ));
        }
        if f.header_marker.trim().is_empty() {
            return Err(MergeError::ConfigValidation(
                "header_marker must not be empty".into(),
            ));
        }
        if f.timestamp_format.trim().is_empty() {
            return Err(MergeError::ConfigValidation(
                "timestamp_format must not be empty".into(),
            ));
        }

        let c = &self.classifier;
        if c.time_marker.trim().is_empty() {
            return Err(MergeError::ConfigValidation(
                "time_marker must not be empty".into(),
            ));
        }
        if c.time_units.iter().any(|u| u.trim().is_empty()) {
            return Err(MergeError::ConfigValidation(
                "time_units must not contain empty tokens".into(),
            ));
        }
        let [lo, hi] = c.max_code_range;
        if lo > hi || hi > 999 {
            return Err(MergeError::ConfigValidation(format!(
                "max_code_range must be ordered within 0..=999, got [{lo}, {hi}]"
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.format.delimiter, ';');
        assert_eq!(config.format.metadata_lines, 4);
        assert_eq!(config.format.header_marker, "SAP-Arbeitsvorgang");
        assert_eq!(config.classifier.max_code_range, [900, 999]);
        assert!(config.classifier.time_units.iter().any(|u| u == "min"));
    }

    #[test]
    fn parse_overrides() {
        let input = r#"
[format]
delimiter = ","
metadata_lines = 3

[classifier]
time_marker = "TIME"
time_units = ["min"]
max_code_range = [950, 959]
"#;
        let config = EngineConfig::from_toml(input).unwrap();
        assert_eq!(config.format.delimiter_byte(), b',');
        assert_eq!(config.format.metadata_lines, 3);
        // untouched fields keep defaults
        assert_eq!(config.format.output_encoding, "utf-8");
        assert_eq!(config.classifier.time_marker, "TIME");
        assert_eq!(config.classifier.max_code_range, [950, 959]);
    }

    #[test]
    fn reject_unknown_field() {
        let input = r#"
[format]
delimeter = ","
"#;
        let err = EngineConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, MergeError::ConfigParse(_)));
    }

    #[test]
    fn reject_alphanumeric_delimiter() {
        let input = r#"
[format]
delimiter = "x"
"#;
        let err = EngineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("delimiter"));
    }

    #[test]
    fn reject_inverted_code_range() {
        let input = r#"
[classifier]
max_code_range = [999, 900]
"#;
        let err = EngineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("max_code_range"));
    }

    #[test]
    fn reject_zero_metadata_lines() {
        let input = r#"
[format]
metadata_lines = 0
"#;
        let err = EngineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("metadata_lines"));
    }
}
