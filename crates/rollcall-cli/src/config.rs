use anyhow::{Context, Result};
use rollcall_core::policy::{
    DEFAULT_MIN_ATTENDANCE_PERCENT, DEFAULT_SAMPLE_RATE_HZ, DEFAULT_SIMILARITY_THRESHOLD,
};
use rollcall_core::{AttendancePolicy, DEFAULT_EMBEDDING_DIM};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// CLI configuration.
///
/// Precedence, lowest first: defaults, TOML file, `ROLLCALL_*` environment
/// variables, command-line flags (applied by the caller).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Width of enrolled embeddings.
    pub embedding_dimension: usize,
    /// Frames inspected per second of video.
    pub target_sample_rate_hz: f64,
    /// Cosine similarity a match must strictly exceed.
    pub similarity_threshold: f32,
    /// Minimum share of processed frames for Present (50 to 100).
    pub min_attendance_percent: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("attendance.db"),
            embedding_dimension: DEFAULT_EMBEDDING_DIM,
            target_sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            min_attendance_percent: DEFAULT_MIN_ATTENDANCE_PERCENT,
        }
    }
}

impl Config {
    /// Load defaults, then the TOML file (`path`, else `ROLLCALL_CONFIG`),
    /// then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from));

        let mut config = match file {
            Some(file) => Self::from_toml_file(&file)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        env_override("ROLLCALL_EMBEDDING_DIM", &mut self.embedding_dimension);
        env_override("ROLLCALL_SAMPLE_RATE_HZ", &mut self.target_sample_rate_hz);
        env_override("ROLLCALL_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        env_override("ROLLCALL_MIN_ATTENDANCE_PERCENT", &mut self.min_attendance_percent);
    }

    pub fn policy(&self) -> AttendancePolicy {
        AttendancePolicy {
            target_sample_rate_hz: self.target_sample_rate_hz,
            similarity_threshold: self.similarity_threshold,
            min_attendance_percent: self.min_attendance_percent,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_override<T: FromStr>(key: &str, slot: &mut T) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}
