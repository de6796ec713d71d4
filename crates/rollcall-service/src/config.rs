use rollcall_core::detector::{DEFAULT_MIN_NEIGHBORS, DEFAULT_SCALE_FACTOR};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default acceptance cutoff for LBPH chi-square distances (lower is closer).
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 70.0;

const MODEL_FILE: &str = "face_recognizer.yml";
const LABELS_FILE: &str = "labels.json";
const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root for everything below unless overridden.
    pub data_dir: PathBuf,
    /// One sub-folder of face images per student.
    pub dataset_dir: PathBuf,
    /// Directory holding the trained model and its label map.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// OpenCV frontal-face Haar cascade XML.
    pub cascade_path: PathBuf,
    /// Largest LBPH distance still accepted as a match.
    pub distance_threshold: f64,
    pub scale_factor: f64,
    pub min_neighbors: u32,
}

/// Optional values read from the TOML file named by `ROLLCALL_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    cascade_path: Option<PathBuf>,
    distance_threshold: Option<f64>,
    scale_factor: Option<f64>,
    min_neighbors: Option<u32>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    ///
    /// Environment variables win over the config file, which wins over the
    /// built-in defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = match var("ROLLCALL_CONFIG") {
            Some(path) => read_file(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let data_dir = var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&var));

        let path_of = |key: &str, from_file: Option<PathBuf>, default: PathBuf| {
            var(key).map(PathBuf::from).or(from_file).unwrap_or(default)
        };

        Ok(Self {
            dataset_dir: path_of("ROLLCALL_DATASET_DIR", file.dataset_dir, data_dir.join("dataset")),
            model_dir: path_of("ROLLCALL_MODEL_DIR", file.model_dir, data_dir.join("models")),
            db_path: path_of("ROLLCALL_DB_PATH", file.db_path, data_dir.join("attendance.db")),
            cascade_path: path_of("ROLLCALL_CASCADE_PATH", file.cascade_path, data_dir.join(CASCADE_FILE)),
            distance_threshold: env_parsed(&var, "ROLLCALL_DISTANCE_THRESHOLD")
                .and_then(|t| usable_threshold("ROLLCALL_DISTANCE_THRESHOLD", t))
                .or_else(|| {
                    file.distance_threshold
                        .and_then(|t| usable_threshold("distance_threshold", t))
                })
                .unwrap_or(DEFAULT_DISTANCE_THRESHOLD),
            scale_factor: env_parsed(&var, "ROLLCALL_SCALE_FACTOR")
                .or(file.scale_factor)
                .unwrap_or(DEFAULT_SCALE_FACTOR),
            min_neighbors: env_parsed(&var, "ROLLCALL_MIN_NEIGHBORS")
                .or(file.min_neighbors)
                .unwrap_or(DEFAULT_MIN_NEIGHBORS),
            data_dir,
        })
    }

    /// Path to the serialized LBPH model.
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_FILE)
    }

    /// Path to the folder ↔ label id map written alongside the model.
    pub fn labels_path(&self) -> PathBuf {
        self.model_dir.join(LABELS_FILE)
    }

    /// Dataset folder of one student.
    pub fn student_dir(&self, folder: &str) -> PathBuf {
        self.dataset_dir.join(folder)
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn default_data_dir(var: &impl Fn(&str) -> Option<String>) -> PathBuf {
    var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable value");
            None
        }
    }
}

/// Distances are finite and non-negative; any other cutoff is ignored.
fn usable_threshold(key: &str, value: f64) -> Option<f64> {
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        tracing::warn!(key, value, "ignoring distance threshold that is negative or not finite");
        None
    }
}
