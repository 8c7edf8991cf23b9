use rollcall_core::{ConfigError, ConsensusConfig, DetectionFilter, MatchParams};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Effective configuration: defaults, then a TOML file, then `ROLLCALL_*`
/// environment variables. Command-line flags are applied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run the detection filter before matching.
    pub filter_enabled: bool,
    pub matching: MatchParams,
    pub consensus: ConsensusConfig,
    pub filter: DetectionFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filter_enabled: true,
            matching: MatchParams::default(),
            consensus: ConsensusConfig::default(),
            filter: DetectionFilter::default(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigFileError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                tracing::debug!(path = %path.display(), "loaded config file");
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Apply `ROLLCALL_*` overrides. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let m = &mut self.matching;
        m.similarity_threshold =
            env_f32(&lookup, "ROLLCALL_SIMILARITY_THRESHOLD", m.similarity_threshold);
        m.mask_mode = env_bool(&lookup, "ROLLCALL_MASK_MODE", m.mask_mode);

        let c = &mut self.consensus;
        c.iou_threshold = env_f32(&lookup, "ROLLCALL_IOU_THRESHOLD", c.iou_threshold);
        c.min_frames = env_usize(&lookup, "ROLLCALL_MIN_FRAMES", c.min_frames);
        c.frame_budget = env_usize(&lookup, "ROLLCALL_FRAME_BUDGET", c.frame_budget);

        let f = &mut self.filter;
        f.min_confidence = env_f32(&lookup, "ROLLCALL_MIN_CONFIDENCE", f.min_confidence);
        f.min_face_size = env_f32(&lookup, "ROLLCALL_MIN_FACE_SIZE", f.min_face_size);

        self.filter_enabled = env_bool(&lookup, "ROLLCALL_FILTER_DETECTIONS", self.filter_enabled);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matching.validate()?;
        self.consensus.validate()?;
        if self.filter_enabled {
            self.filter.validate()?;
        }
        Ok(())
    }

    /// Filter to hand to the analyzer, if enabled.
    pub fn active_filter(&self) -> Option<DetectionFilter> {
        self.filter_enabled.then_some(self.filter)
    }
}

fn env_f32<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: f32) -> f32 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Any value other than `0`, `false`, `no` or `off` (case-insensitive) enables.
fn env_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !matches!(v.as_str(), "0" | "false" | "no" | "off")
        })
        .unwrap_or(default)
}
