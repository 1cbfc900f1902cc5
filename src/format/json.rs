//! Line-oriented sample JSON.
//!
//! ```text
//! {"samples":[
//! {"features":[1.0,2.0],"label":[350.0,-1.0],"source":"models/a.mch"},
//! {"features":[0.5,0.0],"label":[-1.0,12.0]}
//! ]}
//! ```
//!
//! One sample per line, so files can be read back without holding the
//! whole document. `source` is left out when a sample has none.

use super::{AtomicFile, Format, file_stats, sample_dropped};
use crate::models::{
    Dataset, FeatureSample, GenerationStats, PipelineError, Result, Sample, SampleStream,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

const HEADER: &str = "{\"samples\":[";
const FOOTER: &str = "]}";

#[derive(Serialize)]
struct JsonSampleRef<'a> {
    features: &'a [f64],
    label: &'a [f64],
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a Path>,
}

#[derive(Deserialize)]
struct JsonSample {
    features: Vec<f64>,
    label: Vec<f64>,
    #[serde(default)]
    source: Option<PathBuf>,
}

impl From<JsonSample> for FeatureSample {
    fn from(s: JsonSample) -> Self {
        Sample::new(s.features, s.label, s.source)
    }
}

#[derive(Deserialize)]
struct JsonDocument {
    samples: Vec<JsonSample>,
}

/// `{"samples":[...]}` with numeric feature and label vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl JsonFormat {
    pub fn new() -> Self {
        Self
    }

    fn encode(sample: &FeatureSample) -> Result<String> {
        if let Some(bad) = sample
            .features
            .iter()
            .chain(&sample.label)
            .find(|v| !v.is_finite())
        {
            return Err(PipelineError::Serialization(format!(
                "{bad} has no JSON representation"
            )));
        }
        let line = serde_json::to_string(&JsonSampleRef {
            features: &sample.features,
            label: &sample.label,
            source: sample.source.as_deref(),
        })?;
        Ok(line)
    }

    fn decode(line: &str) -> Result<FeatureSample> {
        let entry = line.strip_suffix(',').unwrap_or(line);
        let sample: JsonSample = serde_json::from_str(entry)?;
        Ok(sample.into())
    }
}

impl Format<Vec<f64>, Vec<f64>> for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn file_extension(&self) -> &'static str {
        "json"
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
        file.write_all(HEADER.as_bytes()).map_err(io_err)?;

        let mut written = 0;
        let mut failed = 0;
        for item in samples {
            match item.and_then(|sample| Self::encode(&sample)) {
                Ok(line) => {
                    let separator = if written == 0 { "\n" } else { ",\n" };
                    file.write_all(separator.as_bytes()).map_err(io_err)?;
                    file.write_all(line.as_bytes()).map_err(io_err)?;
                    written += 1;
                }
                Err(e) => {
                    sample_dropped(&target, &e);
                    failed += 1;
                }
            }
        }

        file.write_all(format!("\n{FOOTER}\n").as_bytes())
            .map_err(io_err)?;
        file.commit()?;
        Ok(file_stats(written, failed))
    }

    /// Streams line by line. Files not in the one-sample-per-line layout
    /// are parsed as a whole instead.
    fn load_samples(&self, file: &Path) -> Result<SampleStream<Vec<f64>, Vec<f64>>> {
        let handle = File::open(file)
            .map_err(|e| PipelineError::io(format!("opening {}", file.display()), e))?;
        let mut reader = BufReader::new(handle);

        let mut first = String::new();
        reader
            .read_line(&mut first)
            .map_err(|e| PipelineError::io(format!("reading {}", file.display()), e))?;

        if first.trim() != HEADER {
            let mut rest = String::new();
            reader
                .read_to_string(&mut rest)
                .map_err(|e| PipelineError::io(format!("reading {}", file.display()), e))?;
            first.push_str(&rest);
            let document: JsonDocument = serde_json::from_str(&first).map_err(|e| {
                PipelineError::Parse(format!("{}: {e}", file.display()))
            })?;
            return Ok(SampleStream::from_samples(
                document.samples.into_iter().map(Into::into).collect(),
            ));
        }

        let path = file.to_path_buf();
        let mut lines = reader.lines();
        let mut closed = false;
        Ok(SampleStream::new(std::iter::from_fn(move || {
            if closed {
                return None;
            }
            loop {
                let line = match lines.next() {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        closed = true;
                        return Some(Err(PipelineError::io(
                            format!("reading {}", path.display()),
                            e,
                        )));
                    }
                    None => {
                        closed = true;
                        return Some(Err(PipelineError::Parse(format!(
                            "{} ends before the closing {FOOTER}",
                            path.display()
                        ))));
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == FOOTER {
                    closed = true;
                    return None;
                }
                return Some(Self::decode(line));
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample(f: f64, source: Option<&str>) -> FeatureSample {
        Sample::new(vec![f, 2.0], vec![350.0, -1.0], source.map(PathBuf::from))
    }

    #[test]
    fn writes_one_sample_per_line_without_null_source() {
        let dir = TempDir::new().unwrap();
        let dataset = Dataset::from_samples(
            Some(PathBuf::from("m/a.mch")),
            vec![sample(1.0, Some("m/a.mch")), sample(0.5, None)],
        );

        let stats = JsonFormat::new().write_samples(dataset, dir.path()).unwrap();
        assert_eq!(stats.samples_written, 2);
        assert_eq!(stats.files_created, 1);
        assert_eq!(stats.samples_failed, 0);

        let text = fs::read_to_string(dir.path().join("m/a.json")).unwrap();
        assert_eq!(
            text,
            "{\"samples\":[\n\
             {\"features\":[1.0,2.0],\"label\":[350.0,-1.0],\"source\":\"m/a.mch\"},\n\
             {\"features\":[0.5,2.0],\"label\":[350.0,-1.0]}\n\
             ]}\n"
        );
    }

    #[test]
    fn reloads_written_samples() {
        let dir = TempDir::new().unwrap();
        let samples = vec![sample(1.0, Some("m/a.mch")), sample(3.0, None)];
        let format = JsonFormat::new();
        format
            .write_samples(Dataset::from_samples(None, samples.clone()), dir.path())
            .unwrap();

        let loaded: Vec<_> = format
            .load_samples(&dir.path().join("null.json"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(loaded, samples);
    }

    #[test]
    fn unencodable_samples_are_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let bad = Sample::new(vec![f64::NAN], vec![1.0], None);
        let dataset = Dataset::from_samples(None, vec![sample(1.0, None), bad, sample(2.0, None)]);

        let stats = JsonFormat::new().write_samples(dataset, dir.path()).unwrap();
        assert_eq!(stats.samples_written, 2);
        assert_eq!(stats.samples_failed, 1);

        let text = fs::read_to_string(dir.path().join("null.json")).unwrap();
        assert!(!text.contains(",\n]}"));
        assert_eq!(
            JsonFormat::new()
                .load_samples(&dir.path().join("null.json"))
                .unwrap()
                .count(),
            2
        );
    }

    #[test]
    fn empty_dataset_still_creates_a_file() {
        let dir = TempDir::new().unwrap();
        let stats = JsonFormat::new()
            .write_samples(Dataset::from_samples(None, Vec::new()), dir.path())
            .unwrap();
        assert_eq!(stats.files_created, 1);
        let text = fs::read_to_string(dir.path().join("null.json")).unwrap();
        assert_eq!(text, "{\"samples\":[\n]}\n");
        assert_eq!(
            JsonFormat::new()
                .load_samples(&dir.path().join("null.json"))
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn falls_back_to_whole_document_parsing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pretty.json");
        fs::write(
            &path,
            r#"{
  "samples": [
    { "features": [1, 2], "label": [3], "source": "x.mch" }
  ]
}"#,
        )
        .unwrap();

        let loaded: Vec<_> = JsonFormat::new()
            .load_samples(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            loaded,
            vec![Sample::new(vec![1.0, 2.0], vec![3.0], Some(PathBuf::from("x.mch")))]
        );
    }

    #[test]
    fn truncated_file_reports_an_error_item() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cut.json");
        fs::write(&path, "{\"samples\":[\n{\"features\":[1.0],\"label\":[2.0]},\n").unwrap();

        let items: Vec<_> = JsonFormat::new().load_samples(&path).unwrap().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(PipelineError::Parse(_))));
    }
}
