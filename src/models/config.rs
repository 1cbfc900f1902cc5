//! Configuration models for predsel.
//!
//! Everything a run needs is read once from a TOML file at startup and then
//! passed down explicitly. Nothing is kept in process-wide state.

use crate::backend::{Backend, Preference, Strategy, TimeoutSpec, expand_preferences};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level configuration for predsel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// External engine bridge
    #[serde(default)]
    pub engine: EngineConfig,

    /// Backends to label with, in declaration order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Label settings
    #[serde(default)]
    pub labels: LabelConfig,

    /// Directory walk settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Configuration of the external engine bridge executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bridge executable. `${VAR}` is expanded from the environment.
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Extra arguments placed before the bridge sub-command
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_engine_command() -> String {
    "solver-bridge".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            args: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn resolved_command(&self) -> String {
        expand_env_vars(&self.command)
    }

    pub fn resolved_args(&self) -> Vec<String> {
        self.args.iter().map(|a| expand_env_vars(a)).collect()
    }
}

/// One backend entry. With `cross` set, the entry expands into one backend
/// per preference subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Solving strategy
    pub strategy: Strategy,

    /// Explicit name (derived from strategy and preferences otherwise)
    #[serde(default)]
    pub name: Option<String>,

    /// Wall-clock budget per decision
    #[serde(default)]
    pub timeout: TimeoutSpec,

    /// `KEY=VALUE` preferences
    #[serde(default)]
    pub preferences: Vec<String>,

    /// Expand the preference cross-product
    #[serde(default)]
    pub cross: bool,
}

/// Which label encoding to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelKind {
    /// One decision time per backend
    #[default]
    Timings,
    /// The fastest backend that decided, or none
    Classification,
}

impl FromStr for LabelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timings" => Ok(Self::Timings),
            "classification" => Ok(Self::Classification),
            other => Err(format!(
                "unknown label kind '{other}' (expected timings or classification)"
            )),
        }
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timings => f.write_str("timings"),
            Self::Classification => f.write_str("classification"),
        }
    }
}

/// Label configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default)]
    pub kind: LabelKind,

    /// Measurements per formula and backend. With more than one, the first
    /// (warm-up) run is discarded and the rest averaged.
    #[serde(default = "default_sampling_size")]
    pub sampling_size: usize,
}

fn default_sampling_size() -> usize {
    1
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            kind: LabelKind::default(),
            sampling_size: default_sampling_size(),
        }
    }
}

/// Directory walk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Descend into sub-directories
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Skip source files whose target already exists
    #[serde(default = "default_true")]
    pub lazy: bool,

    /// Source files processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Extensions of source model files
    #[serde(default = "default_model_extensions")]
    pub model_extensions: Vec<String>,

    /// Seed for dataset splits
    #[serde(default = "default_split_seed")]
    pub split_seed: u64,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_model_extensions() -> Vec<String> {
    ["mch", "ref", "imp", "eventb", "tla"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_split_seed() -> u64 {
    42
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            lazy: true,
            workers: default_workers(),
            model_extensions: default_model_extensions(),
            split_seed: default_split_seed(),
        }
    }
}

/// Persistence format selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    /// `{"samples":[...]}` with numeric feature and label vectors
    #[default]
    Json,
    /// One JSON object per source file keyed by predicate text
    PredicateDb,
    /// Positional CSV
    Csv,
    /// Legacy `labels:predicate` line dump with `#source:` annotations
    Pdump,
}

impl FormatKind {
    /// Whether samples of this format carry predicate text rather than a
    /// numeric feature vector.
    pub fn is_predicate_family(self) -> bool {
        matches!(self, Self::PredicateDb | Self::Pdump)
    }
}

impl FromStr for FormatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "predicate-db" => Ok(Self::PredicateDb),
            "csv" => Ok(Self::Csv),
            "pdump" => Ok(Self::Pdump),
            other => Err(format!(
                "unknown format '{other}' (expected json, predicate-db, csv or pdump)"
            )),
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::PredicateDb => "predicate-db",
            Self::Csv => "csv",
            Self::Pdump => "pdump",
        };
        f.write_str(s)
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: FormatKind,

    /// Emit a header row in CSV output
    #[serde(default = "default_true")]
    pub csv_header: bool,

    /// Label columns of CSV files read without a header row
    #[serde(default)]
    pub csv_label_columns: Option<usize>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: FormatKind::default(),
            csv_header: true,
            csv_label_columns: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::InlineParse(source) => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::InlineParse)
    }

    /// Instantiate every configured backend, in declaration order.
    ///
    /// Cross-product entries are expanded, identical backends are collapsed
    /// and names must be unique.
    pub fn build_backends(&self) -> Result<Vec<Backend>, ConfigError> {
        let mut backends: IndexSet<Backend> = IndexSet::new();

        for entry in &self.backends {
            let preferences = entry
                .preferences
                .iter()
                .map(|p| p.parse::<Preference>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(ConfigError::InvalidPreference)?;

            let combinations = expand_preferences(&preferences, entry.cross)
                .map_err(ConfigError::InvalidPreference)?;
            let several = combinations.len() > 1;

            for prefs in combinations {
                let mut backend = Backend::new(entry.strategy, prefs, entry.timeout);
                if let Some(name) = &entry.name {
                    let name = if several {
                        format!("{name}{}", backend.preference_suffix())
                    } else {
                        name.clone()
                    };
                    backend = backend.with_name(name);
                }
                backends.insert(backend);
            }
        }

        let mut names = HashSet::new();
        for backend in &backends {
            if !names.insert(backend.name()) {
                return Err(ConfigError::DuplicateBackend(backend.name().to_string()));
            }
        }

        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        Ok(backends.into_iter().collect())
    }

    /// Example configuration printed by `predsel example`.
    pub fn example() -> &'static str {
        r#"# predsel configuration file

[engine]
# Bridge executable driving the solver; ${VAR} is expanded
command = "${PROB_HOME}/solver-bridge"
args = []

[[backends]]
strategy = "prob"
timeout = { value = 20, unit = "seconds" }
preferences = ["TIME_OUT=3000", "MAXINT=17"]
cross = true

[[backends]]
strategy = "kodkod"

[[backends]]
strategy = "z3"
timeout = { value = 2500, unit = "milliseconds" }

[labels]
kind = "timings"        # or "classification"
sampling_size = 1

[generation]
recursive = true
lazy = true
workers = 4
model_extensions = ["mch", "ref", "imp", "eventb", "tla"]
split_seed = 42

[output]
format = "json"         # json | predicate-db | csv | pdump
csv_header = true
# csv_label_columns = 2   # needed to read CSV files without a header row
"#
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR_NAME}` syntax. Unset variables are left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };

    re.replace_all(s, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| cap[0].to_string())
    })
    .into_owned()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to parse config: {0}")]
    InlineParse(toml::de::Error),

    #[error("Invalid preference: {0}")]
    InvalidPreference(String),

    #[error("Backend name '{0}' is used more than once")]
    DuplicateBackend(String),

    #[error("No backends configured (add at least one [[backends]] entry)")]
    NoBackends,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses_and_builds() {
        let config = Config::from_toml(Config::example()).unwrap();
        assert_eq!(config.output.format, FormatKind::Json);
        assert_eq!(config.labels.kind, LabelKind::Timings);

        let backends = config.build_backends().unwrap();
        // prob expands to {TIME_OUT, MAXINT} and {TIME_OUT}, plus kodkod and z3
        assert_eq!(backends.len(), 4);
        assert_eq!(backends[0].strategy(), Strategy::Prob);
        assert_eq!(backends[2].strategy(), Strategy::Kodkod);
        assert_eq!(
            backends[3].timeout().as_duration(),
            std::time::Duration::from_millis(2500)
        );
    }

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config = Config::from_toml(
            r#"
[[backends]]
strategy = "z3"
"#,
        )
        .unwrap();
        assert!(config.generation.lazy);
        assert_eq!(config.generation.workers, 4);
        assert_eq!(config.labels.sampling_size, 1);
        let backends = config.build_backends().unwrap();
        assert_eq!(
            backends[0].timeout().as_duration(),
            std::time::Duration::from_secs(20)
        );
    }

    #[test]
    fn duplicate_backend_names_are_rejected() {
        let config = Config::from_toml(
            r#"
[[backends]]
strategy = "z3"
name = "fast"

[[backends]]
strategy = "kodkod"
name = "fast"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.build_backends(),
            Err(ConfigError::DuplicateBackend(name)) if name == "fast"
        ));
    }

    #[test]
    fn identical_backends_collapse() {
        let config = Config::from_toml(
            r#"
[[backends]]
strategy = "z3"

[[backends]]
strategy = "z3"
"#,
        )
        .unwrap();
        assert_eq!(config.build_backends().unwrap().len(), 1);
    }

    #[test]
    fn empty_backend_list_is_an_error() {
        let config = Config::default();
        assert!(matches!(config.build_backends(), Err(ConfigError::NoBackends)));
    }

    #[test]
    fn unknown_variables_are_left_alone() {
        assert_eq!(
            expand_env_vars("${PREDSEL_SURELY_UNSET_VAR}/bin"),
            "${PREDSEL_SURELY_UNSET_VAR}/bin"
        );
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[test]
    fn format_and_label_kinds_parse() {
        assert_eq!("pdump".parse::<FormatKind>().unwrap(), FormatKind::Pdump);
        assert_eq!(
            "predicate-db".parse::<FormatKind>().unwrap(),
            FormatKind::PredicateDb
        );
        assert!("xml".parse::<FormatKind>().is_err());
        assert_eq!(
            "classification".parse::<LabelKind>().unwrap(),
            LabelKind::Classification
        );
    }
}
