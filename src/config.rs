// File: src/config.rs
use crate::error::{Result, TrainerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How individual words contribute to the weighted session score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightingPolicy {
    /// Every word counts once; the weighted score equals overall accuracy.
    Uniform,
    /// Longer words (more reference phonemes) count more.
    PhonemeLength,
    /// Words built from phonemes the learner usually gets wrong count more.
    /// A word whose phonemes are all weak weighs `weight`, one with none weighs 1.
    WeakPhonemes {
        #[serde(default = "default_weak_weight")]
        weight: f64,
        #[serde(default = "default_weak_threshold")]
        threshold: f64,
    },
}

impl Default for WeightingPolicy {
    fn default() -> Self {
        Self::Uniform
    }
}

fn default_weak_weight() -> f64 {
    2.0
}
fn default_weak_threshold() -> f64 {
    0.4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// A word whose accuracy falls below this is counted as an error.
    pub error_threshold: f64,
    pub weighting: WeightingPolicy,
    pub worst_line_count: usize,
    /// Lines under this accuracy are reported as struggling.
    pub struggling_line_threshold: f64,
    pub lock_timeout_ms: u64,
    pub profile_dir: PathBuf,
    pub lesson_language: String,
    pub log_level: String,
}

impl TrainerConfig {
    pub const DEFAULT_ERROR_THRESHOLD: f64 = 1.0;
    pub const DEFAULT_WORST_LINE_COUNT: usize = 3;
    pub const DEFAULT_STRUGGLING_LINE_THRESHOLD: f64 = 0.8;
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TrainerError::io("reading trainer config", e))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| TrainerError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults when the file does not exist; a malformed file is still an error.
    pub fn from_file_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.error_threshold) {
            return Err(TrainerError::config(format!(
                "error_threshold must lie in [0, 1], got {}",
                self.error_threshold
            )));
        }
        if !unit.contains(&self.struggling_line_threshold) {
            return Err(TrainerError::config(format!(
                "struggling_line_threshold must lie in [0, 1], got {}",
                self.struggling_line_threshold
            )));
        }
        if self.worst_line_count == 0 {
            return Err(TrainerError::config("worst_line_count must be at least 1"));
        }
        if let WeightingPolicy::WeakPhonemes { weight, threshold } = &self.weighting {
            if !(*weight >= 1.0 && weight.is_finite()) {
                return Err(TrainerError::config(format!(
                    "weak phoneme weight must be a finite value >= 1, got {weight}"
                )));
            }
            if !unit.contains(threshold) {
                return Err(TrainerError::config(format!(
                    "weak phoneme threshold must lie in [0, 1], got {threshold}"
                )));
            }
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            error_threshold: Self::DEFAULT_ERROR_THRESHOLD,
            weighting: WeightingPolicy::default(),
            worst_line_count: Self::DEFAULT_WORST_LINE_COUNT,
            struggling_line_threshold: Self::DEFAULT_STRUGGLING_LINE_THRESHOLD,
            lock_timeout_ms: Self::DEFAULT_LOCK_TIMEOUT_MS,
            profile_dir: default_profile_dir(),
            lesson_language: "en-us".to_string(),
            log_level: "info".to_string(),
        }
    }
}

fn default_profile_dir() -> PathBuf {
    match dirs::data_local_dir() {
        Some(mut path) => {
            path.push("singing-language-trainer");
            path.push("profiles");
            path
        }
        None => PathBuf::from("profiles"),
    }
}
