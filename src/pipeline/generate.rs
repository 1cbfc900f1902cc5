//! Generation orchestrator: source models in, labeled sample files out.
//!
//! Pipeline flow per model file:
//! context -> formulas -> features + label per formula -> samples -> format
//!
//! Each file runs start to finish on its own task with its own evaluation
//! context. A file that fails is counted and the walk goes on. Only an
//! unreachable engine or an unusable target stops the run.

use super::{WalkEntry, collect_files, ensure_target_dir, file_progress};
use crate::backend::{Label, Labeler};
use crate::engine::{ContextGuard, Engine, FeatureGenerator, FormulaGenerator};
use crate::format::{Format, sweep_partial_files};
use crate::models::{
    Dataset, ErrorScope, GenerationConfig, GenerationStats, PipelineError, PredicateLabel, Result,
    Sample, engine_error_for,
};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// How a labeled formula becomes a sample of a given format family.
pub trait SampleKind: Send + Sync + 'static {
    type Features: Send + 'static;
    type Label: Send + 'static;

    /// Whether the feature generator has to run.
    const NEEDS_FEATURES: bool;

    fn assemble(
        formula: &str,
        features: Vec<f64>,
        label: &Label,
        source: &Path,
    ) -> Sample<Self::Features, Self::Label>;
}

/// Feature vector plus positional label vector.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericSamples;

impl SampleKind for NumericSamples {
    type Features = Vec<f64>;
    type Label = Vec<f64>;

    const NEEDS_FEATURES: bool = true;

    fn assemble(
        _formula: &str,
        features: Vec<f64>,
        label: &Label,
        source: &Path,
    ) -> Sample<Vec<f64>, Vec<f64>> {
        Sample::new(features, label.to_vector(), Some(source.to_path_buf()))
    }
}

/// Predicate text plus label keyed by backend name.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredicateSamples;

impl SampleKind for PredicateSamples {
    type Features = String;
    type Label = PredicateLabel;

    const NEEDS_FEATURES: bool = false;

    fn assemble(
        formula: &str,
        _features: Vec<f64>,
        label: &Label,
        source: &Path,
    ) -> Sample<String, PredicateLabel> {
        Sample::new(
            formula.to_string(),
            label.to_predicate_label(),
            Some(source.to_path_buf()),
        )
    }
}

/// Settings of one generation run.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub recursive: bool,
    /// Skip models whose target file already exists
    pub lazy: bool,
    pub workers: usize,
    /// Extensions of source model files, without the dot
    pub model_extensions: Vec<String>,
    pub show_progress: bool,
}

impl GenerationOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            recursive: config.recursive,
            lazy: config.lazy,
            workers: config.workers,
            model_extensions: config.model_extensions.clone(),
            show_progress: false,
        }
    }

    fn is_model(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| {
            self.model_extensions
                .iter()
                .any(|m| ext.eq_ignore_ascii_case(m.as_str()))
        })
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

/// Walks source models and writes one labeled sample file per model.
pub struct Generator<E, S: SampleKind> {
    engine: Arc<E>,
    labeler: Arc<Labeler>,
    format: Arc<dyn Format<S::Features, S::Label>>,
    options: GenerationOptions,
    _kind: PhantomData<S>,
}

impl<E, S> Generator<E, S>
where
    E: Engine + FormulaGenerator<E::Context> + FeatureGenerator<E::Context>,
    S: SampleKind,
{
    pub fn new(
        engine: Arc<E>,
        labeler: Labeler,
        format: Arc<dyn Format<S::Features, S::Label>>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            engine,
            labeler: Arc::new(labeler),
            format,
            options,
            _kind: PhantomData,
        }
    }

    /// Generate data for every model below `source_dir` into `target_dir`.
    pub async fn run(&self, source_dir: &Path, target_dir: &Path) -> Result<GenerationStats> {
        ensure_target_dir(target_dir)?;
        let swept = sweep_partial_files(target_dir, self.format.file_extension())?;
        let files = collect_files(source_dir, self.options.recursive, |p| {
            self.options.is_model(p)
        })?;

        info!(
            source = %source_dir.display(),
            target = %target_dir.display(),
            format = self.format.name(),
            backends = self.labeler.backends().len(),
            files = files.len(),
            lazy = self.options.lazy,
            swept,
            "Starting generation"
        );

        let pb = file_progress(files.len(), self.options.show_progress);
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut handles = Vec::with_capacity(files.len());

        for entry in files {
            let task = FileTask::<E, S> {
                engine: Arc::clone(&self.engine),
                labeler: Arc::clone(&self.labeler),
                format: Arc::clone(&self.format),
                target_dir: target_dir.to_path_buf(),
                lazy: self.options.lazy,
                _kind: PhantomData,
            };
            let semaphore = Arc::clone(&semaphore);
            let handle = tokio::spawn(async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => task.process(&entry).await,
                    Err(_) => Err(PipelineError::Internal("Semaphore closed".to_string())),
                };
                (entry, result)
            });
            handles.push(handle);
        }

        let mut stats = GenerationStats::default();
        let mut fatal: Option<PipelineError> = None;

        for handle in handles {
            let outcome = handle.await;
            pb.inc(1);
            match outcome {
                Ok((_, Ok(file_stats))) => stats += file_stats,
                Ok((entry, Err(e))) => {
                    stats += GenerationStats::seen() + GenerationStats::file_error();
                    if e.is_fatal() {
                        warn!(
                            file = %entry.relative.display(),
                            error = %e,
                            "Generation cannot continue"
                        );
                        fatal.get_or_insert(e);
                    } else {
                        warn!(file = %entry.relative.display(), error = %e, "Skipping file");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Generation task panicked");
                    stats += GenerationStats::seen() + GenerationStats::file_error();
                }
            }
            pb.set_message(format!(
                "samples: {}, skipped files: {}",
                stats.samples_written, stats.files_skipped
            ));
        }
        pb.finish_and_clear();

        if let Some(e) = fatal {
            return Err(e);
        }

        info!(
            files_seen = stats.files_seen,
            files_created = stats.files_created,
            files_skipped = stats.files_skipped,
            files_with_errors = stats.files_with_errors,
            samples_written = stats.samples_written,
            samples_failed = stats.samples_failed,
            formulas_skipped = stats.formulas_skipped,
            "Generation complete"
        );
        Ok(stats)
    }
}

/// Everything one file task needs, owned so it can move onto the task.
struct FileTask<E, S: SampleKind> {
    engine: Arc<E>,
    labeler: Arc<Labeler>,
    format: Arc<dyn Format<S::Features, S::Label>>,
    target_dir: PathBuf,
    lazy: bool,
    _kind: PhantomData<S>,
}

impl<E, S> FileTask<E, S>
where
    E: Engine + FormulaGenerator<E::Context> + FeatureGenerator<E::Context>,
    S: SampleKind,
{
    async fn process(&self, entry: &WalkEntry) -> Result<GenerationStats> {
        let mut stats = GenerationStats::seen();
        if self.lazy
            && self
                .format
                .data_already_exists(Some(&entry.relative), &self.target_dir)
        {
            debug!(file = %entry.relative.display(), "Target exists, skipping");
            return Ok(stats + GenerationStats::skipped());
        }

        let model = entry.path.clone();
        let samples = {
            let guard = self.open(&model).await?;
            let formulas = self.formulas(&model, guard.context()).await?;
            debug!(
                file = %entry.relative.display(),
                formulas = formulas.len(),
                "Extracted formulas"
            );

            let mut samples = Vec::with_capacity(formulas.len());
            for formula in formulas {
                match self.sample_for(&formula, &entry.relative, guard.context()).await {
                    Ok(sample) => samples.push(sample),
                    Err(e) => match e.scope() {
                        ErrorScope::Sample => {
                            warn!(
                                file = %entry.relative.display(),
                                formula = %formula,
                                error = %e,
                                "Dropping sample"
                            );
                            stats.samples_failed += 1;
                        }
                        ErrorScope::Formula => {
                            warn!(
                                file = %entry.relative.display(),
                                formula = %formula,
                                error = %e,
                                "Skipping formula"
                            );
                            stats += GenerationStats::formula_skipped();
                        }
                        ErrorScope::File | ErrorScope::Run => return Err(e),
                    },
                }
            }
            samples
        };

        let format = Arc::clone(&self.format);
        let target_dir = self.target_dir.clone();
        let dataset = Dataset::from_samples(Some(entry.relative.clone()), samples);
        let written =
            tokio::task::spawn_blocking(move || format.write_samples(dataset, &target_dir))
                .await
                .map_err(|e| PipelineError::Internal(format!("writer task failed: {e}")))??;

        debug!(
            file = %entry.relative.display(),
            samples = written.samples_written,
            "Wrote samples"
        );
        Ok(stats + written)
    }

    async fn open(&self, model: &Path) -> Result<ContextGuard<E>> {
        let engine = Arc::clone(&self.engine);
        let path = model.to_path_buf();
        tokio::task::spawn_blocking(move || ContextGuard::acquire(&engine, &path))
            .await
            .map_err(|e| PipelineError::Internal(format!("context task failed: {e}")))?
            .map_err(|e| engine_error_for(model, e))
    }

    async fn formulas(&self, model: &Path, context: &Arc<E::Context>) -> Result<Vec<String>> {
        let engine = Arc::clone(&self.engine);
        let context = Arc::clone(context);
        tokio::task::spawn_blocking(move || FormulaGenerator::generate(&*engine, &*context))
            .await
            .map_err(|e| PipelineError::Internal(format!("formula task failed: {e}")))?
            .map_err(|e| engine_error_for(model, e))
    }

    async fn sample_for(
        &self,
        formula: &str,
        source: &Path,
        context: &Arc<E::Context>,
    ) -> Result<Sample<S::Features, S::Label>> {
        let features = if S::NEEDS_FEATURES {
            let engine = Arc::clone(&self.engine);
            let ctx = Arc::clone(context);
            let text = formula.to_string();
            tokio::task::spawn_blocking(move || FeatureGenerator::generate(&*engine, &text, &*ctx))
                .await
                .map_err(|e| PipelineError::Internal(format!("feature task failed: {e}")))?
                .map_err(|e| engine_error_for(source, e))?
        } else {
            Vec::new()
        };

        let label = self.labeler.label(&self.engine, context, formula).await?;
        label.check_against(self.labeler.backends())?;
        Ok(S::assemble(formula, features, &label, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, Strategy, TimeoutSpec};
    use crate::engine::{ScriptedEngine, ScriptedResponse};
    use crate::format::{JsonFormat, PredicateDbFormat};
    use crate::models::LabelKind;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn labeler() -> Labeler {
        Labeler::new(
            vec![
                Backend::new(Strategy::Prob, Vec::new(), TimeoutSpec::default()),
                Backend::new(Strategy::Z3, Vec::new(), TimeoutSpec::default()),
            ],
            LabelKind::Timings,
            1,
        )
        .unwrap()
    }

    fn models(dir: &Path, names: &[&str]) {
        for name in names {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, "MACHINE m END").unwrap();
        }
    }

    #[tokio::test]
    async fn writes_one_file_per_model() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        models(source.path(), &["a.mch", "sub/b.mch", "notes.txt"]);

        let engine = Arc::new(ScriptedEngine::new().default_formulas(&["x > 0", "y = 1"]));
        let generator: Generator<_, NumericSamples> = Generator::new(
            Arc::clone(&engine),
            labeler(),
            Arc::new(JsonFormat::new()),
            GenerationOptions::default(),
        );

        let stats = generator.run(source.path(), target.path()).await.unwrap();
        assert_eq!(stats.files_seen, 2);
        assert_eq!(stats.files_created, 2);
        assert_eq!(stats.samples_written, 4);
        assert!(target.path().join("a.json").is_file());
        assert!(target.path().join("sub/b.json").is_file());
        assert_eq!(engine.opened(), engine.closed());
    }

    #[tokio::test]
    async fn lazy_mode_skips_existing_targets() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        models(source.path(), &["a.mch", "b.mch"]);
        fs::write(target.path().join("a.json"), "{}").unwrap();

        let engine = Arc::new(ScriptedEngine::new().default_formulas(&["p"]));
        let run = |lazy| {
            let generator: Generator<_, PredicateSamples> = Generator::new(
                Arc::clone(&engine),
                labeler(),
                Arc::new(PredicateDbFormat::new()),
                GenerationOptions {
                    lazy,
                    ..GenerationOptions::default()
                },
            );
            let (source, target) = (source.path().to_path_buf(), target.path().to_path_buf());
            async move { generator.run(&source, &target).await.unwrap() }
        };

        let lazy = run(true).await;
        assert_eq!(lazy.files_skipped, 1);
        assert_eq!(lazy.files_created, 1);
        assert_eq!(fs::read_to_string(target.path().join("a.json")).unwrap(), "{}");

        let eager = run(false).await;
        assert_eq!(eager.files_skipped, 0);
        assert_eq!(eager.files_created, 2);
        assert!(fs::read_to_string(target.path().join("a.json")).unwrap().contains("\"p\""));
    }

    #[tokio::test]
    async fn failures_stay_inside_their_scope() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        models(source.path(), &["good.mch", "broken.mch"]);

        let engine = Arc::new(
            ScriptedEngine::new()
                .default_formulas(&["x > 0", "((", "crash"])
                .broken_model("broken")
                .rule(None, "((", ScriptedResponse::Untranslatable, Duration::ZERO)
                .rule(None, "crash", ScriptedResponse::Fail("boom".into()), Duration::ZERO),
        );
        let generator: Generator<_, PredicateSamples> = Generator::new(
            Arc::clone(&engine),
            labeler(),
            Arc::new(PredicateDbFormat::new()),
            GenerationOptions::default(),
        );

        let stats = generator.run(source.path(), target.path()).await.unwrap();
        assert_eq!(stats.files_seen, 2);
        assert_eq!(stats.files_with_errors, 1);
        assert_eq!(stats.files_created, 1);
        assert_eq!(stats.samples_written, 1);
        assert_eq!(stats.formulas_skipped, 2);
        assert_eq!(engine.opened(), engine.closed());
    }

    #[tokio::test]
    async fn unreachable_engine_stops_the_run() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        models(source.path(), &["a.mch"]);

        let generator: Generator<_, NumericSamples> = Generator::new(
            Arc::new(ScriptedEngine::new().unavailable()),
            labeler(),
            Arc::new(JsonFormat::new()),
            GenerationOptions::default(),
        );
        assert!(matches!(
            generator.run(source.path(), target.path()).await,
            Err(PipelineError::EngineUnavailable(_))
        ));
    }
}
