//! Sample, dataset and statistics types.
//!
//! These types are the unit of data flowing from the labeler (or a
//! format reader) into a format writer.

use crate::models::{PipelineError, Result};
use indexmap::IndexMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};

/// A labeled feature vector, optionally attributed to the source model it
/// was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample<F, L> {
    pub features: F,
    pub label: L,
    pub source: Option<PathBuf>,
}

impl<F, L> Sample<F, L> {
    pub fn new(features: F, label: L, source: Option<PathBuf>) -> Self {
        Self {
            features,
            label,
            source,
        }
    }
}

/// Numeric sample: feature vector plus positional label vector.
pub type FeatureSample = Sample<Vec<f64>, Vec<f64>>;

/// Predicate sample: the predicate text plus decision times keyed by backend name.
pub type DbSample = Sample<String, PredicateLabel>;

/// Decision times in nanoseconds keyed by backend name, in backend
/// declaration order. `-1` marks a backend that could not decide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredicateLabel(IndexMap<String, i64>);

impl PredicateLabel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair positional values with backend names.
    pub fn from_values(names: &[String], values: &[i64]) -> Result<Self> {
        if names.len() != values.len() {
            return Err(PipelineError::Parse(format!(
                "expected {} label values, found {}",
                names.len(),
                values.len()
            )));
        }
        Ok(Self(
            names.iter().cloned().zip(values.iter().copied()).collect(),
        ))
    }

    pub fn insert(&mut self, backend: impl Into<String>, nanos: i64) {
        self.0.insert(backend.into(), nanos);
    }

    pub fn get(&self, backend: &str) -> Option<i64> {
        self.0.get(backend).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values in the given backend order.
    ///
    /// A missing backend is a data-integrity error, not an unknown result.
    pub fn values_in(&self, order: &[String]) -> Result<Vec<i64>> {
        order
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| PipelineError::LabelIntegrity {
                    backend: name.clone(),
                })
            })
            .collect()
    }
}

/// Single-pass stream of samples.
///
/// Items are `Err` when a single sample could not be read; consumers count
/// those and keep going. Polling the stream again after it reported the
/// end is a programming error and panics. Call
/// [`Dataset::materialize`] to iterate more than once.
pub struct SampleStream<F, L> {
    inner: Box<dyn Iterator<Item = Result<Sample<F, L>>> + Send>,
    exhausted: bool,
}

impl<F: Send + 'static, L: Send + 'static> SampleStream<F, L> {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<Sample<F, L>>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
            exhausted: false,
        }
    }

    pub fn from_samples(samples: Vec<Sample<F, L>>) -> Self {
        Self::new(samples.into_iter().map(Ok))
    }

    fn limit(self, max: usize) -> Self {
        Self::new(self.inner.take(max))
    }
}

impl<F, L> Iterator for SampleStream<F, L> {
    type Item = Result<Sample<F, L>>;

    fn next(&mut self) -> Option<Self::Item> {
        assert!(
            !self.exhausted,
            "sample stream polled after exhaustion; materialize the dataset to iterate twice"
        );
        let item = self.inner.next();
        if item.is_none() {
            self.exhausted = true;
        }
        item
    }
}

/// A named source file plus a lazily produced sequence of samples.
pub struct Dataset<F, L> {
    source_file: Option<PathBuf>,
    samples: SampleStream<F, L>,
}

impl<F: Send + 'static, L: Send + 'static> Dataset<F, L> {
    pub fn new(source_file: Option<PathBuf>, samples: SampleStream<F, L>) -> Self {
        Self {
            source_file,
            samples,
        }
    }

    pub fn from_samples(source_file: Option<PathBuf>, samples: Vec<Sample<F, L>>) -> Self {
        Self::new(source_file, SampleStream::from_samples(samples))
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    /// Split into the source file name and the sample stream.
    pub fn into_parts(self) -> (Option<PathBuf>, SampleStream<F, L>) {
        (self.source_file, self.samples)
    }

    /// Keep at most `max` samples, in order.
    pub fn trim(self, max: usize) -> Self {
        Self {
            source_file: self.source_file,
            samples: self.samples.limit(max),
        }
    }

    /// Collect the stream so it can be reused. Fails on the first unreadable sample.
    pub fn materialize(self) -> Result<MaterializedDataset<F, L>> {
        let samples = self.samples.collect::<Result<Vec<_>>>()?;
        Ok(MaterializedDataset {
            source_file: self.source_file,
            samples,
        })
    }

    /// Deterministically partition the samples.
    ///
    /// `round(len * ratio)` samples, picked by a shuffle seeded with `seed`,
    /// land in the first partition and the rest in the second. Both keep the
    /// original relative order and the source file of this dataset.
    pub fn split(self, ratio: f64, seed: u64) -> Result<(Self, Self)> {
        let (first, second) = self.materialize()?.split(ratio, seed)?;
        Ok((first.into_dataset(), second.into_dataset()))
    }
}

impl<F, L> IntoIterator for Dataset<F, L> {
    type Item = Result<Sample<F, L>>;
    type IntoIter = SampleStream<F, L>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples
    }
}

/// A dataset whose samples are held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedDataset<F, L> {
    pub source_file: Option<PathBuf>,
    pub samples: Vec<Sample<F, L>>,
}

impl<F: Send + 'static, L: Send + 'static> MaterializedDataset<F, L> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_dataset(self) -> Dataset<F, L> {
        Dataset::from_samples(self.source_file, self.samples)
    }

    /// See [`Dataset::split`].
    pub fn split(self, ratio: f64, seed: u64) -> Result<(Self, Self)> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(PipelineError::InvalidInput(format!(
                "split ratio must be within [0, 1], got {ratio}"
            )));
        }

        let total = self.samples.len();
        let first_len = ((total as f64) * ratio).round() as usize;
        let first_len = first_len.min(total);

        let mut indices: Vec<usize> = (0..total).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        let chosen: HashSet<usize> = indices.into_iter().take(first_len).collect();

        let mut first = Vec::with_capacity(first_len);
        let mut second = Vec::with_capacity(total - first_len);
        for (idx, sample) in self.samples.into_iter().enumerate() {
            if chosen.contains(&idx) {
                first.push(sample);
            } else {
                second.push(sample);
            }
        }

        Ok((
            Self {
                source_file: self.source_file.clone(),
                samples: first,
            },
            Self {
                source_file: self.source_file,
                samples: second,
            },
        ))
    }
}

/// Counters for one write, one file, or a whole run.
///
/// Merging is plain counter addition, so the order in which parallel
/// units are merged does not matter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Source files visited by the walk
    pub files_seen: usize,
    /// Target files written
    pub files_created: usize,
    /// Files skipped because their target already existed
    pub files_skipped: usize,
    /// Files that could not be processed
    pub files_with_errors: usize,
    /// Samples persisted
    pub samples_written: usize,
    /// Samples dropped because they could not be read or written
    pub samples_failed: usize,
    /// Formulas skipped because they could not be translated or labeled
    #[serde(default)]
    pub formulas_skipped: usize,
}

impl GenerationStats {
    pub fn seen() -> Self {
        Self {
            files_seen: 1,
            ..Default::default()
        }
    }

    pub fn file_error() -> Self {
        Self {
            files_with_errors: 1,
            ..Default::default()
        }
    }

    pub fn skipped() -> Self {
        Self {
            files_skipped: 1,
            ..Default::default()
        }
    }

    pub fn formula_skipped() -> Self {
        Self {
            formulas_skipped: 1,
            ..Default::default()
        }
    }
}

impl Add for GenerationStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            files_seen: self.files_seen + rhs.files_seen,
            files_created: self.files_created + rhs.files_created,
            files_skipped: self.files_skipped + rhs.files_skipped,
            files_with_errors: self.files_with_errors + rhs.files_with_errors,
            samples_written: self.samples_written + rhs.samples_written,
            samples_failed: self.samples_failed + rhs.samples_failed,
            formulas_skipped: self.formulas_skipped + rhs.formulas_skipped,
        }
    }
}

impl AddAssign for GenerationStats {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for GenerationStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}
