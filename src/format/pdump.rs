//! Legacy predicate dump.
//!
//! ```text
//! #source:models/a.mch
//! 3500,-1:x > 0
//! 120,80:y = 1
//! #source:models/b.mch
//! -1,-1:z : NAT
//! ```
//!
//! Content lines are `<comma-joined label values>:<predicate>`. A
//! `#source:` line sets the source of every following line up to the next
//! one; an empty path means "no source". Writers emit it exactly when the
//! source changes, starting with the first sample. Other `#` lines are
//! comments and ignored on read.
//!
//! Values are positional. Backend names come from the format, and when it
//! has none they are generated as `backend_0`, `backend_1`, ...

use super::{AtomicFile, Format, file_stats, sample_dropped};
use crate::models::{
    Dataset, DbSample, GenerationStats, PipelineError, PredicateLabel, Result, Sample,
    SampleStream,
};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const SOURCE_MARKER: &str = "#source:";

/// `values:predicate` lines with run-length `#source:` annotations.
#[derive(Debug, Clone, Default)]
pub struct PdumpFormat {
    backend_names: Vec<String>,
}

impl PdumpFormat {
    pub fn new(backend_names: Vec<String>) -> Self {
        Self { backend_names }
    }

    pub fn backend_names(&self) -> &[String] {
        &self.backend_names
    }

    fn encode(&self, sample: &DbSample) -> Result<String> {
        if sample.features.contains('\n') || sample.features.contains('\r') {
            return Err(PipelineError::Serialization(
                "predicate spans several lines".to_string(),
            ));
        }
        let values: Vec<i64> = if self.backend_names.is_empty() {
            sample.label.iter().map(|(_, v)| v).collect()
        } else {
            sample.label.values_in(&self.backend_names)?
        };
        let values = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Ok(format!("{values}:{}", sample.features))
    }

    fn names_for(&self, count: usize) -> Vec<String> {
        if self.backend_names.is_empty() {
            (0..count).map(|i| format!("backend_{i}")).collect()
        } else {
            self.backend_names.clone()
        }
    }

    fn decode(&self, line: &str, source: Option<PathBuf>, line_no: usize) -> Result<DbSample> {
        let (values, predicate) = line.split_once(':').ok_or_else(|| {
            PipelineError::Serialization(format!("line {line_no}: missing ':' separator"))
        })?;
        let values = values
            .split(',')
            .map(|v| {
                v.trim().parse::<i64>().map_err(|e| {
                    PipelineError::Serialization(format!("line {line_no}: '{v}': {e}"))
                })
            })
            .collect::<Result<Vec<i64>>>()?;
        let label = PredicateLabel::from_values(&self.names_for(values.len()), &values)
            .map_err(|e| PipelineError::Serialization(format!("line {line_no}: {e}")))?;
        Ok(Sample::new(predicate.to_string(), label, source))
    }
}

fn source_line(source: Option<&Path>) -> String {
    match source {
        Some(path) => format!("{SOURCE_MARKER}{}", path.display()),
        None => SOURCE_MARKER.to_string(),
    }
}

impl Format<String, PredicateLabel> for PdumpFormat {
    fn name(&self) -> &'static str {
        "pdump"
    }

    fn file_extension(&self) -> &'static str {
        "pdump"
    }

    fn write_samples(
        &self,
        dataset: Dataset<String, PredicateLabel>,
        target_dir: &Path,
    ) -> Result<GenerationStats> {
        let (source_file, samples) = dataset.into_parts();
        let target = self.target_location(source_file.as_deref(), target_dir);
        let io_err = |e| PipelineError::io(format!("writing {}", target.display()), e);

        let mut file = AtomicFile::create(&target)?;
        // Outer None: nothing written yet, so even a sourceless first
        // sample gets its annotation.
        let mut current: Option<Option<PathBuf>> = None;
        let mut written = 0;
        let mut failed = 0;

        for item in samples {
            let encoded = item.and_then(|sample| {
                let line = self.encode(&sample)?;
                Ok((line, sample.source))
            });
            let (line, source) = match encoded {
                Ok(encoded) => encoded,
                Err(e) => {
                    sample_dropped(&target, &e);
                    failed += 1;
                    continue;
                }
            };

            if current.as_ref() != Some(&source) {
                writeln!(file, "{}", source_line(source.as_deref())).map_err(io_err)?;
                current = Some(source);
            }
            writeln!(file, "{line}").map_err(io_err)?;
            written += 1;
        }

        file.commit()?;
        Ok(file_stats(written, failed))
    }

    fn load_samples(&self, file: &Path) -> Result<SampleStream<String, PredicateLabel>> {
        let handle = File::open(file)
            .map_err(|e| PipelineError::io(format!("opening {}", file.display()), e))?;
        let path = file.to_path_buf();
        let format = self.clone();
        let mut current: Option<PathBuf> = None;

        let samples = BufReader::new(handle)
            .lines()
            .enumerate()
            .filter_map(move |(idx, line)| {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        return Some(Err(PipelineError::io(
                            format!("reading {}", path.display()),
                            e,
                        )));
                    }
                };
                let line = line.trim_end_matches(['\r', '\n']);
                if let Some(source) = line.strip_prefix(SOURCE_MARKER) {
                    let source = source.trim();
                    current = (!source.is_empty()).then(|| PathBuf::from(source));
                    return None;
                }
                if line.starts_with('#') || line.trim().is_empty() {
                    return None;
                }
                Some(format.decode(line, current.clone(), idx + 1))
            });
        Ok(SampleStream::new(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names() -> Vec<String> {
        vec!["ProB".to_string(), "Z3".to_string()]
    }

    fn sample(predicate: &str, values: &[i64], source: Option<&str>) -> DbSample {
        Sample::new(
            predicate.to_string(),
            PredicateLabel::from_values(&names(), values).unwrap(),
            source.map(PathBuf::from),
        )
    }

    #[test]
    fn annotates_each_source_run_once() {
        let dir = TempDir::new().unwrap();
        let sources = ["A", "A", "B", "B", "B", "A"];
        let samples: Vec<_> = sources
            .iter()
            .enumerate()
            .map(|(i, s)| sample(&format!("p{i}"), &[i as i64, -1], Some(s)))
            .collect();

        let format = PdumpFormat::new(names());
        let stats = format
            .write_samples(Dataset::from_samples(None, samples), dir.path())
            .unwrap();
        assert_eq!(stats.samples_written, 6);

        let text = fs::read_to_string(dir.path().join("null.pdump")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        let annotated: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.starts_with(SOURCE_MARKER))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(annotated.len(), 3);
        assert_eq!(
            text,
            "#source:A\n0,-1:p0\n1,-1:p1\n\
             #source:B\n2,-1:p2\n3,-1:p3\n4,-1:p4\n\
             #source:A\n5,-1:p5\n"
        );
    }

    #[test]
    fn transitions_into_and_out_of_no_source_are_annotated() {
        let dir = TempDir::new().unwrap();
        let samples = vec![
            sample("a", &[1, 2], None),
            sample("b", &[1, 2], Some("m.mch")),
            sample("c", &[1, 2], None),
        ];
        let format = PdumpFormat::new(names());
        format
            .write_samples(Dataset::from_samples(None, samples.clone()), dir.path())
            .unwrap();

        let path = dir.path().join("null.pdump");
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "#source:\n1,2:a\n#source:m.mch\n1,2:b\n#source:\n1,2:c\n"
        );
        let loaded: Vec<_> = format.load_samples(&path).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(loaded, samples);
    }

    #[test]
    fn reads_comments_and_colons_in_predicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.pdump");
        fs::write(
            &path,
            "# generated by an old tool\n#source:m/a.mch\n5,6:x : NAT\n\n#note\n7,8:y = 1\n",
        )
        .unwrap();

        let loaded: Vec<_> = PdumpFormat::new(names())
            .load_samples(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            loaded,
            vec![
                sample("x : NAT", &[5, 6], Some("m/a.mch")),
                sample("y = 1", &[7, 8], Some("m/a.mch")),
            ]
        );
    }

    #[test]
    fn unnamed_values_get_generated_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.pdump");
        fs::write(&path, "1,-1:p\n").unwrap();

        let loaded: Vec<_> = PdumpFormat::default()
            .load_samples(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(loaded[0].label.get("backend_0"), Some(1));
        assert_eq!(loaded[0].label.get("backend_1"), Some(-1));
        assert_eq!(loaded[0].source, None);
    }

    #[test]
    fn bad_lines_are_item_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.pdump");
        fs::write(&path, "1,2:ok\nnot a sample\n1:too few\n").unwrap();

        let items: Vec<_> = PdumpFormat::new(names()).load_samples(&path).unwrap().collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert!(items[2].is_err());
    }

    #[test]
    fn missing_backend_drops_the_sample() {
        let dir = TempDir::new().unwrap();
        let mut partial = PredicateLabel::new();
        partial.insert("ProB", 1);
        let samples = vec![
            Sample::new("p".to_string(), partial, None),
            sample("q", &[1, 2], None),
        ];
        let stats = PdumpFormat::new(names())
            .write_samples(Dataset::from_samples(None, samples), dir.path())
            .unwrap();
        assert_eq!(stats.samples_written, 1);
        assert_eq!(stats.samples_failed, 1);
    }
}
