//! Positional CSV: feature columns followed by label columns.
//!
//! Values use Rust's shortest round-trip float formatting. The column
//! count is fixed by the first sample written; later samples of another
//! shape are dropped. Source paths and backend names have no column and
//! are lost when migrating into this format.

use super::{AtomicFile, Format, file_stats, sample_dropped};
use crate::models::{
    Dataset, FeatureSample, GenerationStats, PipelineError, Result, Sample, SampleStream,
};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

const FEATURE_PREFIX: &str = "feature_";
const LABEL_PREFIX: &str = "label_";

/// Comma-separated numeric samples.
#[derive(Debug, Clone, Copy)]
pub struct CsvFormat {
    header: bool,
    label_columns: Option<usize>,
}

impl CsvFormat {
    pub fn new(header: bool) -> Self {
        Self {
            header,
            label_columns: None,
        }
    }

    /// Label column count for reading files without a header row.
    pub fn with_label_columns(mut self, count: usize) -> Self {
        self.label_columns = Some(count);
        self
    }

    fn header_row(features: usize, labels: usize) -> String {
        (0..features)
            .map(|i| format!("{FEATURE_PREFIX}{i}"))
            .chain((0..labels).map(|j| format!("{LABEL_PREFIX}{j}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn encode(sample: &FeatureSample) -> String {
        sample
            .features
            .iter()
            .chain(&sample.label)
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Number of label columns announced by a header row, if `line` is one.
    fn label_columns_of(line: &str) -> Option<usize> {
        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        let is_header = columns
            .iter()
            .all(|c| c.starts_with(FEATURE_PREFIX) || c.starts_with(LABEL_PREFIX));
        is_header.then(|| columns.iter().filter(|c| c.starts_with(LABEL_PREFIX)).count())
    }

    fn decode(line: &str, label_columns: usize, line_no: usize) -> Result<FeatureSample> {
        let values = line
            .split(',')
            .map(|v| {
                v.trim().parse::<f64>().map_err(|e| {
                    PipelineError::Serialization(format!("line {line_no}: '{v}': {e}"))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        if values.len() < label_columns {
            return Err(PipelineError::Serialization(format!(
                "line {line_no}: {} columns, expected at least {label_columns} labels",
                values.len()
            )));
        }
        let mut features = values;
        let label = features.split_off(features.len() - label_columns);
        Ok(Sample::new(features, label, None))
    }
}

impl Format<Vec<f64>, Vec<f64>> for CsvFormat {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn file_extension(&self) -> &'static str {
        "csv"
    }

    fn write_samples(
        &self,
        dataset: Dataset<Vec<f64>, Vec<f64>>,
        target_dir: &Path,
    ) -> Result<GenerationStats> {
        let (source_file, samples) = dataset.into_parts();
        let target = self.target_location(source_file.as_deref(), target_dir);
        let io_err = |e| PipelineError::io(format!("writing {}", target.display()), e);

        let mut file = AtomicFile::create(&target)?;
        let mut shape: Option<(usize, usize)> = None;
        let mut written = 0;
        let mut failed = 0;

        for item in samples {
            let sample = match item {
                Ok(sample) => sample,
                Err(e) => {
                    sample_dropped(&target, &e);
                    failed += 1;
                    continue;
                }
            };

            let this = (sample.features.len(), sample.label.len());
            match shape {
                Some(expected) if expected != this => {
                    let e = PipelineError::Serialization(format!(
                        "sample has {}+{} columns, file has {}+{}",
                        this.0, this.1, expected.0, expected.1
                    ));
                    sample_dropped(&target, &e);
                    failed += 1;
                    continue;
                }
                Some(_) => {}
                None => {
                    shape = Some(this);
                    if self.header {
                        writeln!(file, "{}", Self::header_row(this.0, this.1)).map_err(io_err)?;
                    }
                }
            }

            writeln!(file, "{}", Self::encode(&sample)).map_err(io_err)?;
            written += 1;
        }

        file.commit()?;
        Ok(file_stats(written, failed))
    }

    fn load_samples(&self, file: &Path) -> Result<SampleStream<Vec<f64>, Vec<f64>>> {
        let handle = File::open(file)
            .map_err(|e| PipelineError::io(format!("opening {}", file.display()), e))?;
        let mut lines = BufReader::new(handle).lines().enumerate().peekable();

        // Skip blank lines to find the header, if there is one.
        let mut label_columns = self.label_columns;
        while let Some((_, Ok(line))) = lines.peek() {
            if line.trim().is_empty() {
                lines.next();
                continue;
            }
            if let Some(count) = Self::label_columns_of(line.trim()) {
                label_columns = Some(count);
                lines.next();
            }
            break;
        }

        // Written from an empty dataset: there is no shape to recover.
        if lines.peek().is_none() {
            return Ok(SampleStream::from_samples(Vec::new()));
        }

        let label_columns = label_columns.ok_or_else(|| {
            PipelineError::Parse(format!(
                "{} has no header row and no label column count was given",
                file.display()
            ))
        })?;

        let path = file.to_path_buf();
        Ok(SampleStream::new(lines.filter_map(move |(idx, line)| {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(Self::decode(line.trim(), label_columns, idx + 1)),
                Err(e) => Some(Err(PipelineError::io(
                    format!("reading {}", path.display()),
                    e,
                ))),
            }
        })))
    }
}
