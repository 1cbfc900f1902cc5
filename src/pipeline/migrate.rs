//! Migration engine: re-encode a sample corpus in another format.
//!
//! The directory tree of the source corpus is mirrored below the target.
//! Each sample keeps the source model it was recorded with, which is not
//! the dump file it is currently read from. One file is one unit of work.
//!
//! What is lost per format pair:
//! - json -> csv: source paths (CSV has no column for them)
//! - csv -> json: nothing beyond what CSV already lost
//! - pdump -> predicate-db: comment lines and repeated predicates (the last
//!   one wins and keeps its own position, so `#source:` runs come back in
//!   the order of the surviving samples)
//! - predicate-db -> pdump: backend names not listed in `backend_names`
//!   when names are given; without names the label order is kept as is

use super::{collect_files, ensure_target_dir, file_progress};
use crate::format::{Format, feature_format, predicate_format, sweep_partial_files};
use crate::models::{Dataset, FormatKind, GenerationStats, OutputConfig, PipelineError, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Settings of one migration run.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Files converted concurrently
    pub workers: usize,
    /// Backend names for positional predicate dumps
    pub backend_names: Vec<String>,
    /// Output settings for the numeric formats
    pub output: OutputConfig,
    pub show_progress: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            backend_names: Vec::new(),
            output: OutputConfig::default(),
            show_progress: false,
        }
    }
}

/// Migrate between two formats given by kind.
///
/// Both formats must hold the same kind of sample.
pub async fn migrate_corpus(
    source_kind: FormatKind,
    source_dir: &Path,
    target_dir: &Path,
    target_kind: FormatKind,
    options: &MigrationOptions,
) -> Result<GenerationStats> {
    if source_kind.is_predicate_family() != target_kind.is_predicate_family() {
        return Err(PipelineError::UnsupportedMigration {
            source_format: source_kind.to_string(),
            target_format: target_kind.to_string(),
        });
    }

    if source_kind.is_predicate_family() {
        let source = predicate_format(source_kind, options.backend_names.clone())?;
        let target = predicate_format(target_kind, options.backend_names.clone())?;
        migrate(source, source_dir, target_dir, target, options).await
    } else {
        let source = feature_format(source_kind, &options.output)?;
        let target = feature_format(target_kind, &options.output)?;
        migrate(source, source_dir, target_dir, target, options).await
    }
}

/// Re-emit every `source_format` file below `source_dir` in
/// `target_format` below `target_dir`.
///
/// A file that cannot be read or written is counted and skipped. Only an
/// unusable target directory ends the run early.
pub async fn migrate<F, L>(
    source_format: Arc<dyn Format<F, L>>,
    source_dir: &Path,
    target_dir: &Path,
    target_format: Arc<dyn Format<F, L>>,
    options: &MigrationOptions,
) -> Result<GenerationStats>
where
    F: Send + 'static,
    L: Send + 'static,
{
    ensure_target_dir(target_dir)?;
    let swept = sweep_partial_files(target_dir, target_format.file_extension())?;
    let files = collect_files(source_dir, true, |p| source_format.is_valid_file(p))?;

    info!(
        source = %source_dir.display(),
        target = %target_dir.display(),
        from = source_format.name(),
        to = target_format.name(),
        files = files.len(),
        swept,
        "Starting migration"
    );

    let pb = file_progress(files.len(), options.show_progress);
    let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut handles = Vec::with_capacity(files.len());

    for entry in files {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Internal("Semaphore closed".to_string()))?;
        let source_format = Arc::clone(&source_format);
        let target_format = Arc::clone(&target_format);
        let target_dir = target_dir.to_path_buf();

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = source_format.load_samples(&entry.path).and_then(|samples| {
                let dataset = Dataset::new(Some(entry.relative.clone()), samples);
                target_format.write_samples(dataset, &target_dir)
            });
            (entry, result)
        });
        handles.push(handle);
    }

    let mut stats = GenerationStats::default();
    let mut fatal: Option<PipelineError> = None;

    for handle in handles {
        let outcome = handle.await;
        pb.inc(1);
        stats += GenerationStats::seen();
        match outcome {
            Ok((entry, Ok(file_stats))) => {
                debug!(
                    file = %entry.relative.display(),
                    written = file_stats.samples_written,
                    failed = file_stats.samples_failed,
                    "Migrated file"
                );
                stats += file_stats;
            }
            Ok((entry, Err(e))) if e.is_fatal() => {
                warn!(file = %entry.relative.display(), error = %e, "Migration cannot continue");
                stats += GenerationStats::file_error();
                fatal.get_or_insert(e);
            }
            Ok((entry, Err(e))) => {
                warn!(file = %entry.relative.display(), error = %e, "Skipping file");
                stats += GenerationStats::file_error();
            }
            Err(e) => {
                warn!(error = %e, "Migration task panicked");
                stats += GenerationStats::file_error();
            }
        }
        pb.set_message(format!(
            "written: {}, failed: {}",
            stats.samples_written, stats.samples_failed
        ));
    }
    pb.finish_and_clear();

    if let Some(e) = fatal {
        return Err(e);
    }

    info!(
        files_seen = stats.files_seen,
        files_created = stats.files_created,
        files_with_errors = stats.files_with_errors,
        samples_written = stats.samples_written,
        samples_failed = stats.samples_failed,
        "Migration complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn rejects_cross_family_pairs() {
        let dir = TempDir::new().unwrap();
        let err = migrate_corpus(
            FormatKind::Pdump,
            dir.path(),
            &dir.path().join("out"),
            FormatKind::Csv,
            &MigrationOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedMigration { .. }));
    }

    #[tokio::test]
    async fn mirrors_tree_and_counts_broken_files() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("nested")).unwrap();
        fs::write(
            source.path().join("nested/a.json"),
            "{\"samples\":[\n{\"features\":[1.0],\"label\":[2.0],\"source\":\"m/a.mch\"}\n]}\n",
        )
        .unwrap();
        fs::write(source.path().join("broken.json"), "not json at all").unwrap();
        fs::write(source.path().join("ignored.txt"), "x").unwrap();
        fs::write(target.path().join("stale.csv.tmp"), "half").unwrap();

        let stats = migrate_corpus(
            FormatKind::Json,
            source.path(),
            target.path(),
            FormatKind::Csv,
            &MigrationOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(stats.files_seen, 2);
        assert_eq!(stats.files_created, 1);
        assert_eq!(stats.files_with_errors, 1);
        assert_eq!(stats.samples_written, 1);
        assert_eq!(
            fs::read_to_string(target.path().join("nested/a.csv")).unwrap(),
            "feature_0,label_0\n1,2\n"
        );
        assert!(!target.path().join("stale.csv.tmp").exists());
    }

    #[tokio::test]
    async fn blocked_subdirectory_only_fails_its_file() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let sample = "{\"samples\":[{\"features\":[1.0],\"label\":[2.0]}]}";
        fs::create_dir_all(source.path().join("nested")).unwrap();
        fs::write(source.path().join("nested/a.json"), sample).unwrap();
        fs::write(source.path().join("ok.json"), sample).unwrap();
        fs::write(target.path().join("nested"), "in the way").unwrap();
        fs::write(target.path().join("notes.tmp"), "mine").unwrap();

        let stats = migrate_corpus(
            FormatKind::Json,
            source.path(),
            target.path(),
            FormatKind::Csv,
            &MigrationOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(stats.files_seen, 2);
        assert_eq!(stats.files_created, 1);
        assert_eq!(stats.files_with_errors, 1);
        assert!(target.path().join("ok.csv").exists());
        assert!(target.path().join("notes.tmp").exists());
    }

    #[tokio::test]
    async fn empty_csv_files_migrate_back() {
        let source = TempDir::new().unwrap();
        let csv = TempDir::new().unwrap();
        let back = TempDir::new().unwrap();
        fs::write(source.path().join("m.json"), "{\"samples\":[]}").unwrap();

        let there = migrate_corpus(
            FormatKind::Json,
            source.path(),
            csv.path(),
            FormatKind::Csv,
            &MigrationOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!((there.files_created, there.samples_written), (1, 0));

        let again = migrate_corpus(
            FormatKind::Csv,
            csv.path(),
            back.path(),
            FormatKind::Json,
            &MigrationOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(again.files_with_errors, 0);
        assert_eq!(again.files_created, 1);
    }

    #[tokio::test]
    async fn missing_source_dir_is_fatal() {
        let target = TempDir::new().unwrap();
        let result = migrate_corpus(
            FormatKind::Json,
            &target.path().join("nope"),
            target.path(),
            FormatKind::Csv,
            &MigrationOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }
}
