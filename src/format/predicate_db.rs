//! Predicate-database JSON: one object per source file, keyed by predicate.
//!
//! ```text
//! {"x > 0":{"timings":{"ProB":3500,"Z3":-1},"source":"models/a.mch"}}
//! ```
//!
//! Timings keep the label's backend order. A predicate is a key, so a
//! file holds each predicate once: when a dataset repeats one, the later
//! sample replaces the earlier, at the later sample's position, and the
//! replaced one is counted as failed.

use super::{AtomicFile, Format, file_stats, sample_dropped};
use crate::models::{
    Dataset, DbSample, GenerationStats, PipelineError, PredicateLabel, Result, Sample,
    SampleStream,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct PredicateEntry {
    timings: PredicateLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,
}

/// JSON object keyed by predicate text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredicateDbFormat;

impl PredicateDbFormat {
    pub fn new() -> Self {
        Self
    }
}

impl Format<String, PredicateLabel> for PredicateDbFormat {
    fn name(&self) -> &'static str {
        "predicate-db"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn write_samples(
        &self,
        dataset: Dataset<String, PredicateLabel>,
        target_dir: &Path,
    ) -> Result<GenerationStats> {
        let (source_file, samples) = dataset.into_parts();
        let target = self.target_location(source_file.as_deref(), target_dir);

        let mut entries: IndexMap<String, PredicateEntry> = IndexMap::new();
        let mut failed = 0;
        for item in samples {
            match item {
                Ok(sample) => {
                    let entry = PredicateEntry {
                        timings: sample.label,
                        source: sample.source,
                    };
                    // The later sample also takes the later position.
                    let replaced = entries.shift_remove(&sample.features).is_some();
                    entries.insert(sample.features.clone(), entry);
                    if replaced {
                        warn!(
                            file = %target.display(),
                            predicate = %sample.features,
                            "Predicate repeated, keeping the later sample"
                        );
                        failed += 1;
                    }
                }
                Err(e) => {
                    sample_dropped(&target, &e);
                    failed += 1;
                }
            }
        }

        let mut file = AtomicFile::create(&target)?;
        serde_json::to_writer(&mut file, &entries)?;
        file.write_all(b"\n")
            .map_err(|e| PipelineError::io(format!("writing {}", target.display()), e))?;
        file.commit()?;
        Ok(file_stats(entries.len(), failed))
    }

    /// Parses the whole object. The format has no line structure to stream.
    fn load_samples(&self, file: &Path) -> Result<SampleStream<String, PredicateLabel>> {
        let text = fs::read_to_string(file)
            .map_err(|e| PipelineError::io(format!("reading {}", file.display()), e))?;
        let entries: IndexMap<String, PredicateEntry> = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Parse(format!("{}: {e}", file.display())))?;

        let samples: Vec<DbSample> = entries
            .into_iter()
            .map(|(predicate, entry)| Sample::new(predicate, entry.timings, entry.source))
            .collect();
        Ok(SampleStream::from_samples(samples))
    }
}
