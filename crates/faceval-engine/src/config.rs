use faceval_core::{ModelEndpoints, Scorer, ScorerError, ThresholdRange, ValidationMonitor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Verification configuration.
///
/// Loaded from an optional TOML file, then overridden by `FACEVAL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Exported ONNX embedding model.
    pub model_path: Option<PathBuf>,
    /// Verification pair list.
    pub pairs_path: Option<PathBuf>,
    /// Pairs per embedder call.
    pub batch_size: usize,
    /// Training steps between validation runs.
    pub validate_interval: u64,
    /// Accuracy a run must exceed before it can count as a new best.
    pub accuracy_floor: f32,
    /// Seconds between checkpoint directory scans in `watch` mode.
    pub poll_interval_secs: u64,
    pub thresholds: ThresholdRange,
    pub endpoints: ModelEndpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: None,
            pairs_path: None,
            batch_size: 32,
            validate_interval: 2000,
            accuracy_floor: 0.85,
            poll_interval_secs: 30,
            thresholds: ThresholdRange::default(),
            endpoints: ModelEndpoints::default(),
        }
    }
}

impl Config {
    /// Load `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `FACEVAL_*` variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEVAL_MODEL") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEVAL_PAIRS") {
            self.pairs_path = Some(PathBuf::from(v));
        }
        override_parsed(&lookup, "FACEVAL_BATCH_SIZE", &mut self.batch_size);
        override_parsed(&lookup, "FACEVAL_VALIDATE_INTERVAL", &mut self.validate_interval);
        override_parsed(&lookup, "FACEVAL_ACCURACY_FLOOR", &mut self.accuracy_floor);
        override_parsed(&lookup, "FACEVAL_POLL_INTERVAL_SECS", &mut self.poll_interval_secs);
        override_parsed(&lookup, "FACEVAL_THRESHOLD_START", &mut self.thresholds.start);
        override_parsed(&lookup, "FACEVAL_THRESHOLD_STOP", &mut self.thresholds.stop);
        override_parsed(&lookup, "FACEVAL_THRESHOLD_STEP", &mut self.thresholds.step);
        override_parsed(&lookup, "FACEVAL_INPUT_SIZE", &mut self.endpoints.input_size);
        if let Some(v) = lookup("FACEVAL_INPUT_NAME") {
            self.endpoints.input = v;
        }
        if let Some(v) = lookup("FACEVAL_OUTPUT_NAME") {
            self.endpoints.output = v;
        }
    }

    pub fn scorer(&self) -> Result<Scorer, ScorerError> {
        Scorer::new(self.thresholds)
    }

    pub fn monitor(&self) -> ValidationMonitor {
        ValidationMonitor::new(self.validate_interval, self.accuracy_floor)
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.validate_interval, 2000);
        assert_eq!(c.accuracy_floor, 0.85);
        assert_eq!(c.scorer().unwrap().candidates().len(), 58);
    }

    #[test]
    fn test_parse_toml_partial() {
        let c: Config = toml::from_str(
            r#"
            model_path = "model_out/best.onnx"
            accuracy_floor = 0.9

            [thresholds]
            step = 0.1

            [endpoints]
            output = "gdc/embedding/Identity"
            layout = "nchw"
            input_size = 112
            "#,
        )
        .unwrap();
        assert_eq!(c.model_path, Some(PathBuf::from("model_out/best.onnx")));
        assert_eq!(c.accuracy_floor, 0.9);
        assert_eq!(c.batch_size, 32);
        assert_eq!(c.thresholds.start, 0.1);
        assert_eq!(c.thresholds.step, 0.1);
        assert_eq!(c.endpoints.input, "input_images");
        assert_eq!(c.endpoints.input_size, 112);
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_overrides(lookup_from(&[
            ("FACEVAL_PAIRS", "/data/pairs.txt"),
            ("FACEVAL_BATCH_SIZE", "8"),
            ("FACEVAL_THRESHOLD_STOP", "2.0"),
            ("FACEVAL_ACCURACY_FLOOR", "not-a-number"),
            ("FACEVAL_OUTPUT_NAME", "emb"),
        ]));
        assert_eq!(c.pairs_path, Some(PathBuf::from("/data/pairs.txt")));
        assert_eq!(c.batch_size, 8);
        assert_eq!(c.thresholds.stop, 2.0);
        assert_eq!(c.accuracy_floor, 0.85);
        assert_eq!(c.endpoints.output, "emb");
    }

    #[test]
    fn test_invalid_thresholds_rejected_by_scorer() {
        let mut c = Config::default();
        c.thresholds.step = 0.0;
        assert!(c.scorer().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/faceval.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_monitor_from_config() {
        let m = Config::default().monitor();
        assert!(m.is_due(4000));
        assert_eq!(m.accuracy_floor(), 0.85);
    }
}
