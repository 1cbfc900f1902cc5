//! Format module - on-disk codecs for samples.
//!
//! Two families exist. Numeric formats (`json`, `csv`) persist
//! [`FeatureSample`](crate::models::FeatureSample)s, predicate formats
//! (`predicate-db`, `pdump`) persist [`DbSample`](crate::models::DbSample)s.
//! A corpus can only be migrated within one family.
//!
//! Every writer produces its file under a `.tmp` name and renames it into
//! place once complete, so an abandoned run never leaves a half-written
//! target behind.

mod csv;
mod json;
mod pdump;
mod predicate_db;

pub use csv::*;
pub use json::*;
pub use pdump::*;
pub use predicate_db::*;

use crate::models::{
    Dataset, FormatKind, GenerationStats, OutputConfig, PipelineError, PredicateLabel, Result,
    SampleStream,
};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Suffix of partially written files.
pub const PARTIAL_SUFFIX: &str = "tmp";

/// File name used when a dataset has no source file.
pub const NULL_STEM: &str = "null";

/// A codec for persisting and loading samples.
pub trait Format<F, L>: Send + Sync {
    /// Name used on the command line.
    fn name(&self) -> &'static str;

    /// Extension of files in this format, without the dot.
    fn file_extension(&self) -> &'static str;

    /// Where the data for `source` lands below `target_dir`.
    ///
    /// The source's extension is replaced by this format's. Root, prefix
    /// and `..` components are dropped so the result always stays inside
    /// `target_dir`. Pure: touches neither the filesystem nor any state.
    fn target_location(&self, source: Option<&Path>, target_dir: &Path) -> PathBuf {
        let relative: PathBuf = match source {
            Some(source) => source
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part),
                    _ => None,
                })
                .collect(),
            None => PathBuf::new(),
        };
        let relative = if relative.as_os_str().is_empty() {
            PathBuf::from(NULL_STEM)
        } else {
            relative
        };
        target_dir
            .join(relative)
            .with_extension(self.file_extension())
    }

    /// Whether `path` carries this format's extension.
    fn is_valid_file(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(self.file_extension()))
    }

    /// Whether data for `source` already exists below `target_dir`.
    fn data_already_exists(&self, source: Option<&Path>, target_dir: &Path) -> bool {
        self.target_location(source, target_dir).is_file()
    }

    /// Consume `dataset` and write it below `target_dir`.
    ///
    /// Samples that cannot be read or encoded are counted as failed. The
    /// call fails only if the target file cannot be produced at all.
    fn write_samples(&self, dataset: Dataset<F, L>, target_dir: &Path) -> Result<GenerationStats>;

    /// Open `file` and stream its samples.
    fn load_samples(&self, file: &Path) -> Result<SampleStream<F, L>>;
}

/// Numeric format trait object.
pub type FeatureFormat = Arc<dyn Format<Vec<f64>, Vec<f64>>>;

/// Predicate format trait object.
pub type PredicateFormat = Arc<dyn Format<String, PredicateLabel>>;

/// Numeric format for `kind`.
pub fn feature_format(kind: FormatKind, output: &OutputConfig) -> Result<FeatureFormat> {
    match kind {
        FormatKind::Json => Ok(Arc::new(JsonFormat::new())),
        FormatKind::Csv => {
            let csv = CsvFormat::new(output.csv_header);
            Ok(Arc::new(match output.csv_label_columns {
                Some(count) => csv.with_label_columns(count),
                None => csv,
            }))
        }
        other => Err(PipelineError::InvalidInput(format!(
            "{other} stores predicates, not feature vectors"
        ))),
    }
}

/// Predicate format for `kind`. `backend_names` name the positional label
/// values of a predicate dump.
pub fn predicate_format(kind: FormatKind, backend_names: Vec<String>) -> Result<PredicateFormat> {
    match kind {
        FormatKind::PredicateDb => Ok(Arc::new(PredicateDbFormat::new())),
        FormatKind::Pdump => Ok(Arc::new(PdumpFormat::new(backend_names))),
        other => Err(PipelineError::InvalidInput(format!(
            "{other} stores feature vectors, not predicates"
        ))),
    }
}

/// A file written under a temporary name and renamed into place on commit.
///
/// Dropping it without committing removes the temporary file.
pub struct AtomicFile {
    target: PathBuf,
    partial: PathBuf,
    writer: Option<BufWriter<File>>,
    committed: bool,
}

impl AtomicFile {
    /// Create the parent directories of `target` and open its partial file.
    ///
    /// Failures are scoped to this one file. Whether the target directory as
    /// a whole is usable is checked once, before any file is written.
    pub fn create(target: &Path) -> Result<Self> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }
        let partial = partial_path(target);
        let file = File::create(&partial)
            .map_err(|e| PipelineError::io(format!("creating {}", partial.display()), e))?;
        Ok(Self {
            target: target.to_path_buf(),
            partial,
            writer: Some(BufWriter::new(file)),
            committed: false,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Flush and move the file into place.
    pub fn commit(mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| PipelineError::io(format!("flushing {}", self.partial.display()), e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| PipelineError::io(format!("syncing {}", self.partial.display()), e))?;
        }
        fs::rename(&self.partial, &self.target)
            .map_err(|e| PipelineError::io(format!("renaming to {}", self.target.display()), e))?;
        self.committed = true;
        debug!(file = %self.target.display(), "Committed");
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(io::Error::other("file already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.writer.take());
        match fs::remove_file(&self.partial) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(file = %self.partial.display(), error = %e, "Could not remove partial file")
            }
        }
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Remove partial `.<extension>.tmp` files an abandoned run left below `dir`.
///
/// Other `.tmp` files are left alone. Returns how many were removed. A
/// missing directory has none.
pub fn sweep_partial_files(dir: &Path, extension: &str) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let pattern = format!(
        "{}/**/*.{}.{PARTIAL_SUFFIX}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(extension)
    );
    let stale: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| PipelineError::Internal(format!("Invalid glob pattern: {e}")))?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .collect();

    for path in &stale {
        warn!(file = %path.display(), "Removing partial file from an earlier run");
        fs::remove_file(path).map_err(|e| PipelineError::io("removing partial file", e))?;
    }
    Ok(stale.len())
}

/// Stats of one successfully committed file.
pub(crate) fn file_stats(written: usize, failed: usize) -> GenerationStats {
    GenerationStats {
        files_created: 1,
        samples_written: written,
        samples_failed: failed,
        ..Default::default()
    }
}

/// Log a sample that was dropped while writing.
pub(crate) fn sample_dropped(target: &Path, error: &PipelineError) {
    warn!(file = %target.display(), error = %error, "Dropping sample");
}
