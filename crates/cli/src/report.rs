//! Per-file outcomes of one batch run, printed as a summary or as JSON.

use serde::Serialize;

use crate::exit_codes::{EXIT_PARTIAL, EXIT_SUCCESS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Success,
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: String,
    pub outcome: FileOutcome,
    /// Files written for this input.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// Non-fatal findings, e.g. dropped rows.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl FileReport {
    pub fn success(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            outcome: FileOutcome::Success,
            outputs: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn skipped(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: FileOutcome::Skipped {
                reason: reason.into(),
            },
            ..Self::success(file)
        }
    }

    pub fn failed(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: FileOutcome::Failed {
                reason: reason.into(),
            },
            ..Self::success(file)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_id: Option<String>,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            merge_id: None,
            files: Vec::new(),
        }
    }

    pub fn push(&mut self, file: FileReport) {
        self.files.push(file);
    }

    /// (succeeded, skipped, failed)
    pub fn counts(&self) -> (usize, usize, usize) {
        self.files
            .iter()
            .fold((0, 0, 0), |(ok, skip, fail), f| match f.outcome {
                FileOutcome::Success => (ok + 1, skip, fail),
                FileOutcome::Skipped { .. } => (ok, skip + 1, fail),
                FileOutcome::Failed { .. } => (ok, skip, fail + 1),
            })
    }

    pub fn exit_code(&self) -> u8 {
        let (_, skipped, failed) = self.counts();
        if skipped + failed > 0 {
            EXIT_PARTIAL
        } else {
            EXIT_SUCCESS
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Human summary on stderr.
    pub fn print_summary(&self) {
        for f in &self.files {
            match &f.outcome {
                FileOutcome::Success => {
                    for out in &f.outputs {
                        eprintln!("  ok      {} -> {}", f.file, out);
                    }
                    if f.outputs.is_empty() {
                        eprintln!("  ok      {}", f.file);
                    }
                }
                FileOutcome::Skipped { reason } => eprintln!("  skipped {}: {}", f.file, reason),
                FileOutcome::Failed { reason } => eprintln!("  failed  {}: {}", f.file, reason),
            }
            for w in &f.warnings {
                eprintln!("          warning: {w}");
            }
        }

        let (ok, skipped, failed) = self.counts();
        match &self.merge_id {
            Some(id) => eprintln!(
                "{}: {ok} processed, {skipped} skipped, {failed} failed (merge id {id})",
                self.command
            ),
            None => eprintln!(
                "{}: {ok} processed, {skipped} skipped, {failed} failed",
                self.command
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_reflects_skips_and_failures() {
        let mut report = BatchReport::new("merge");
        report.push(FileReport::success("a.csv"));
        assert_eq!(report.exit_code(), EXIT_SUCCESS);

        report.push(FileReport::skipped("d.csv", "more than 3 sources"));
        assert_eq!(report.exit_code(), EXIT_PARTIAL);
        assert_eq!(report.counts(), (1, 1, 0));
    }

    #[test]
    fn json_shape() {
        let mut report = BatchReport::new("unmerge");
        report.push(FileReport::failed("m.csv", "no side-store"));
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["command"], "unmerge");
        assert!(value.get("merge_id").is_none());
        assert_eq!(value["files"][0]["outcome"]["status"], "failed");
        assert_eq!(value["files"][0]["outcome"]["reason"], "no side-store");
        assert!(value["files"][0].get("outputs").is_none());
    }
}
