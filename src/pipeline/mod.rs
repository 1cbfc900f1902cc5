//! Pipeline module - corpus migration, sample generation and dataset
//! splitting.

mod generate;
mod migrate;
mod split;

pub use generate::*;
pub use migrate::*;
pub use split::*;

use crate::models::{GenerationStats, PipelineError, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// End-of-run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Sub-command that produced the run
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub runtime_secs: f64,
    #[serde(flatten)]
    pub stats: GenerationStats,
}

impl RunSummary {
    pub fn new(
        command: impl Into<String>,
        started_at: DateTime<Utc>,
        stats: GenerationStats,
    ) -> Self {
        let runtime_secs = (Utc::now() - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            command: command.into(),
            started_at,
            runtime_secs,
            stats,
        }
    }

    /// Write the summary as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| PipelineError::io("writing run summary", e))
    }
}

/// A file found below a walk root, with its path relative to that root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub relative: PathBuf,
}

/// Regular files below `root` accepted by `accept`, sorted by path.
///
/// A missing or unreadable root is fatal. Unreadable entries below it are
/// skipped with a warning.
pub fn collect_files(
    root: &Path,
    recursive: bool,
    accept: impl Fn(&Path) -> bool,
) -> Result<Vec<WalkEntry>> {
    if !root.is_dir() {
        return Err(PipelineError::InvalidInput(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let walker = WalkDir::new(root)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !accept(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .map_err(|e| PipelineError::Internal(format!("walk left its root: {e}")))?;
        files.push(WalkEntry {
            path: entry.path().to_path_buf(),
            relative,
        });
    }
    Ok(files)
}

/// Make sure `dir` exists and can hold output.
pub(crate) fn ensure_target_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::TargetUnavailable {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// Progress bar over `len` files, hidden when `show` is false.
pub(crate) fn file_progress(len: usize, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn collects_matching_files_relative_to_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("b.mch"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::write(dir.path().join("sub/deeper/c.mch"), "").unwrap();

        let is_model = |p: &Path| p.extension().is_some_and(|e| e == "mch");
        let all = collect_files(dir.path(), true, is_model).unwrap();
        assert_eq!(
            all.iter().map(|e| e.relative.clone()).collect::<Vec<_>>(),
            vec![PathBuf::from("b.mch"), PathBuf::from("sub/deeper/c.mch")]
        );

        let top = collect_files(dir.path(), false, is_model).unwrap();
        assert_eq!(top.len(), 1);

        assert!(collect_files(&dir.path().join("missing"), true, is_model).is_err());
    }

    #[test]
    fn summary_is_flat_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        let stats = GenerationStats {
            files_seen: 2,
            samples_written: 5,
            ..Default::default()
        };
        RunSummary::new("migrate", Utc::now(), stats).write_to(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["command"], "migrate");
        assert_eq!(value["files_seen"], 2);
        assert_eq!(value["samples_written"], 5);
    }
}
