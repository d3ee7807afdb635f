//! Daemon configuration from an optional TOML file and `VIGIL_*` environment
//! overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use vigil_core::{LocatorConfig, PipelineConfig, PipelineError};

const CONFIG_FILE_NAME: &str = "vigild.toml";
const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(#[source] PipelineError),
}

/// Optional settings read from the TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub model_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub media_dir: Option<PathBuf>,
    pub identify_threshold: Option<f32>,
    pub duplicate_threshold: Option<f32>,
    pub min_face_size: Option<u32>,
    pub default_location: Option<String>,
    pub session_bus: Option<bool>,
}

impl ConfigFile {
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Daemon configuration: config file first, `VIGIL_*` environment variables on top.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX detection model.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root directory for reference photos and access images.
    pub media_dir: PathBuf,
    /// Normalized-distance threshold for a positive identification.
    pub identify_threshold: f32,
    /// Normalized-distance threshold under which an enrollment is a duplicate.
    pub duplicate_threshold: f32,
    /// Faces whose shorter side is below this many pixels are ignored.
    pub min_face_size: u32,
    /// Location recorded for identifications that do not name one.
    pub default_location: String,
    /// Register on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load from the config file (if any) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let file = match config_path(&env) {
            Some(path) => {
                let contents = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::Read {
                        path: path.clone(),
                        source,
                    }
                })?;
                tracing::info!(path = %path.display(), "config file loaded");
                ConfigFile::parse(&path, &contents)?
            }
            None => ConfigFile::default(),
        };
        let config = Self::resolve(file, env);
        config.validate()?;
        Ok(config)
    }

    /// Reject thresholds that would disable matching or duplicate detection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline_config().validate().map_err(ConfigError::Invalid)
    }

    /// Merge `file` with overrides looked up through `env`.
    pub fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("vigil");

        let pipeline = PipelineConfig::default();
        let locator = LocatorConfig::default();

        Self {
            model_dir: env_path(&env, "VIGIL_MODEL_DIR")
                .or(file.model_dir)
                .unwrap_or_else(vigil_core::default_model_dir),
            db_path: env_path(&env, "VIGIL_DB_PATH")
                .or(file.db_path)
                .unwrap_or_else(|| data_dir.join("vigil.db")),
            media_dir: env_path(&env, "VIGIL_MEDIA_DIR")
                .or(file.media_dir)
                .unwrap_or_else(|| data_dir.join("media")),
            identify_threshold: env_parse(&env, "VIGIL_IDENTIFY_THRESHOLD")
                .or(file.identify_threshold)
                .unwrap_or(pipeline.identify_threshold),
            duplicate_threshold: env_parse(&env, "VIGIL_DUPLICATE_THRESHOLD")
                .or(file.duplicate_threshold)
                .unwrap_or(pipeline.duplicate_threshold),
            min_face_size: env_parse(&env, "VIGIL_MIN_FACE_SIZE")
                .or(file.min_face_size)
                .unwrap_or(locator.min_face_size),
            default_location: env("VIGIL_DEFAULT_LOCATION")
                .filter(|v| !v.trim().is_empty())
                .or(file.default_location)
                .unwrap_or(pipeline.default_location),
            session_bus: env("VIGIL_SESSION_BUS")
                .map(|v| v != "0")
                .or(file.session_bus)
                .unwrap_or(false),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            identify_threshold: self.identify_threshold,
            duplicate_threshold: self.duplicate_threshold,
            default_location: self.default_location.clone(),
        }
    }

    pub fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            min_face_size: self.min_face_size,
            ..LocatorConfig::default()
        }
    }
}

/// `VIGIL_CONFIG` if set, else `$XDG_CONFIG_HOME/vigil/vigild.toml` when it exists.
fn config_path(env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(explicit) = env("VIGIL_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    let config_home = env("XDG_CONFIG_HOME").map(PathBuf::from).or_else(|| {
        env("HOME").map(|home| PathBuf::from(home).join(".config"))
    })?;
    let path = config_home.join("vigil").join(CONFIG_FILE_NAME);
    path.is_file().then_some(path)
}

fn env_path(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<PathBuf> {
    env(key).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(ConfigFile::default(), env_from(&[("HOME", "/home/gate")]));
        assert_eq!(config.model_dir, vigil_core::default_model_dir());
        assert_eq!(config.db_path, PathBuf::from("/home/gate/.local/share/vigil/vigil.db"));
        assert_eq!(config.media_dir, PathBuf::from("/home/gate/.local/share/vigil/media"));
        assert_eq!(config.identify_threshold, 0.02);
        assert_eq!(config.duplicate_threshold, 0.01);
        assert_eq!(config.min_face_size, 30);
        assert_eq!(config.default_location, "Main Entrance");
        assert!(!config.session_bus);
        assert_eq!(config.scrfd_model_path(), vigil_core::default_model_dir().join("det_10g.onnx"));
    }

    #[test]
    fn test_file_values_apply() {
        let file = ConfigFile::parse(
            Path::new("vigild.toml"),
            r#"
                db_path = "/var/lib/vigil/vigil.db"
                identify_threshold = 0.05
                default_location = "Loading Dock"
                session_bus = true
            "#,
        )
        .unwrap();
        let config = Config::resolve(file, env_from(&[("XDG_DATA_HOME", "/data")]));
        assert_eq!(config.db_path, PathBuf::from("/var/lib/vigil/vigil.db"));
        assert_eq!(config.media_dir, PathBuf::from("/data/vigil/media"));
        assert_eq!(config.identify_threshold, 0.05);
        assert_eq!(config.default_location, "Loading Dock");
        assert!(config.session_bus);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            identify_threshold: Some(0.05),
            min_face_size: Some(40),
            session_bus: Some(true),
            ..ConfigFile::default()
        };
        let config = Config::resolve(
            file,
            env_from(&[
                ("VIGIL_IDENTIFY_THRESHOLD", "0.03"),
                ("VIGIL_MODEL_DIR", "/opt/models"),
                ("VIGIL_SESSION_BUS", "0"),
            ]),
        );
        assert_eq!(config.identify_threshold, 0.03);
        assert_eq!(config.min_face_size, 40);
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert!(!config.session_bus);
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let config = Config::resolve(
            ConfigFile::default(),
            env_from(&[("VIGIL_MIN_FACE_SIZE", "large"), ("VIGIL_DEFAULT_LOCATION", "  ")]),
        );
        assert_eq!(config.min_face_size, 30);
        assert_eq!(config.default_location, "Main Entrance");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ConfigFile::parse(Path::new("vigild.toml"), "camera_device = \"/dev/video0\"")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_defaults_validate() {
        let config = Config::resolve(ConfigFile::default(), env_from(&[]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unusable_thresholds_rejected() {
        for (key, value) in [
            ("VIGIL_DUPLICATE_THRESHOLD", "NaN"),
            ("VIGIL_DUPLICATE_THRESHOLD", "-0.01"),
            ("VIGIL_IDENTIFY_THRESHOLD", "inf"),
        ] {
            let config = Config::resolve(ConfigFile::default(), env_from(&[(key, value)]));
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid(PipelineError::InvalidThreshold(_))),
                "{key}={value}: {err}"
            );
        }
    }

    #[test]
    fn test_duplicate_threshold_looser_than_identify_rejected() {
        let file = ConfigFile::parse(
            Path::new("vigild.toml"),
            "identify_threshold = 0.01\nduplicate_threshold = 0.03\n",
        )
        .unwrap();
        let err = Config::resolve(file, env_from(&[])).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(PipelineError::ThresholdOrder { .. })
        ));
    }

    #[test]
    fn test_derived_core_configs() {
        let config = Config::resolve(
            ConfigFile::default(),
            env_from(&[("VIGIL_MIN_FACE_SIZE", "48"), ("VIGIL_DUPLICATE_THRESHOLD", "0.005")]),
        );
        assert_eq!(config.locator_config().min_face_size, 48);
        assert_eq!(config.locator_config().padding_ratio, LocatorConfig::default().padding_ratio);
        assert_eq!(config.pipeline_config().duplicate_threshold, 0.005);
    }
}
