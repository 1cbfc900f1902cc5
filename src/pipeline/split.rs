//! File-level dataset tooling: deterministic splits and trimming.

use crate::format::Format;
use crate::models::{Dataset, GenerationStats, MaterializedDataset, PipelineError, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Samples of `input` plus the count of unreadable ones.
fn load_readable<F, L>(
    format: &dyn Format<F, L>,
    input: &Path,
) -> Result<(MaterializedDataset<F, L>, usize)>
where
    F: Send + 'static,
    L: Send + 'static,
{
    let mut samples = Vec::new();
    let mut unreadable = 0;
    for item in format.load_samples(input)? {
        match item {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                warn!(file = %input.display(), error = %e, "Skipping unreadable sample");
                unreadable += 1;
            }
        }
    }
    let name = input
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| PipelineError::InvalidInput(format!("{} is not a file", input.display())))?;
    Ok((
        MaterializedDataset {
            source_file: Some(name),
            samples,
        },
        unreadable,
    ))
}

/// Split the samples of `input` into `first_dir` and `second_dir`.
///
/// `round(len * ratio)` samples go to the first directory. The same input,
/// ratio and seed always give the same split. Both outputs keep the input's
/// file name.
pub fn split_file<F, L>(
    format: &dyn Format<F, L>,
    input: &Path,
    ratio: f64,
    seed: u64,
    first_dir: &Path,
    second_dir: &Path,
) -> Result<(GenerationStats, GenerationStats)>
where
    F: Send + 'static,
    L: Send + 'static,
{
    let (dataset, unreadable) = load_readable(format, input)?;
    let (first, second) = dataset.split(ratio, seed)?;
    info!(
        file = %input.display(),
        first = first.len(),
        second = second.len(),
        seed,
        "Splitting dataset"
    );

    let mut first_stats = format.write_samples(first.into_dataset(), first_dir)?;
    let second_stats = format.write_samples(second.into_dataset(), second_dir)?;
    first_stats.samples_failed += unreadable;
    Ok((first_stats, second_stats))
}

/// Keep the first `max` samples of `input` and write them below `target_dir`.
pub fn trim_file<F, L>(
    format: &dyn Format<F, L>,
    input: &Path,
    max: usize,
    target_dir: &Path,
) -> Result<GenerationStats>
where
    F: Send + 'static,
    L: Send + 'static,
{
    let name = input
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| PipelineError::InvalidInput(format!("{} is not a file", input.display())))?;
    let dataset = Dataset::new(Some(name), format.load_samples(input)?).trim(max);
    let stats = format.write_samples(dataset, target_dir)?;
    info!(file = %input.display(), kept = stats.samples_written, max, "Trimmed dataset");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::JsonFormat;
    use crate::models::{FeatureSample, Sample};
    use std::fs;
    use tempfile::TempDir;

    fn corpus(dir: &Path, n: usize) -> PathBuf {
        let samples: Vec<FeatureSample> = (0..n)
            .map(|i| Sample::new(vec![i as f64], vec![1.0], None))
            .collect();
        JsonFormat::new()
            .write_samples(Dataset::from_samples(Some("data.mch".into()), samples), dir)
            .unwrap();
        dir.join("data.json")
    }

    fn json() -> &'static dyn Format<Vec<f64>, Vec<f64>> {
        &JsonFormat
    }

    fn features(path: &Path) -> Vec<f64> {
        JsonFormat::new()
            .load_samples(path)
            .unwrap()
            .map(|s| s.unwrap().features[0])
            .collect()
    }

    #[test]
    fn split_is_reproducible_across_runs() {
        let dir = TempDir::new().unwrap();
        let input = corpus(dir.path(), 9);

        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        let (first, second) = split_file(json(), &input, 1.0 / 3.0, 7, &a, &b).unwrap();
        assert_eq!(first.samples_written, 3);
        assert_eq!(second.samples_written, 6);

        let (c, d) = (dir.path().join("c"), dir.path().join("d"));
        split_file(json(), &input, 1.0 / 3.0, 7, &c, &d).unwrap();
        assert_eq!(
            fs::read_to_string(a.join("data.json")).unwrap(),
            fs::read_to_string(c.join("data.json")).unwrap()
        );
        assert_eq!(features(&b.join("data.json")), features(&d.join("data.json")));
    }

    #[test]
    fn trim_keeps_leading_samples() {
        let dir = TempDir::new().unwrap();
        let input = corpus(dir.path(), 5);
        let out = dir.path().join("trimmed");

        let stats = trim_file(json(), &input, 2, &out).unwrap();
        assert_eq!(stats.samples_written, 2);
        assert_eq!(features(&out.join("data.json")), vec![0.0, 1.0]);
    }
}
