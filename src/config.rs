use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use rollcall_vision::{DetectorSettings, ModelPaths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> =
    Lazy::new(|| Path::new(option_env!("ROLLCALL_CONFIG_PATH").unwrap_or("rollcall.toml")));

/// How a probe picks among several known faces within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// First known face in iteration order wins.
    #[default]
    First,
    /// Closest known face wins.
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera index (`0`) or V4L2 device path.
    pub camera: String,
    pub image_root: PathBuf,
    pub ledger_path: PathBuf,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    /// Maximum L2 distance between normalized embeddings for a match.
    pub tolerance: f32,
    pub match_policy: MatchPolicy,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub capture_delay_secs: f32,
    pub attendance_window_secs: f32,
    /// Where to drop the last annotated frame of a session, if anywhere.
    pub preview_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let models = ModelPaths::default();
        let detector = DetectorSettings::default();
        Self {
            camera: "0".to_string(),
            image_root: PathBuf::from("student_images"),
            ledger_path: PathBuf::from("attendance.xlsx"),
            detector_model: models.detector,
            recognizer_model: models.recognizer,
            tolerance: 1.128,
            match_policy: MatchPolicy::First,
            score_threshold: detector.score_threshold,
            nms_threshold: detector.nms_threshold,
            capture_delay_secs: 6.0,
            attendance_window_secs: 6.0,
            preview_path: None,
        }
    }
}

impl Config {
    pub fn models(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_model.clone(),
            recognizer: self.recognizer_model.clone(),
        }
    }

    pub fn detector(&self) -> DetectorSettings {
        DetectorSettings {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }

    pub fn capture_delay(&self) -> Duration {
        secs(self.capture_delay_secs)
    }

    pub fn attendance_window(&self) -> Duration {
        secs(self.attendance_window_secs)
    }
}

fn secs(v: f32) -> Duration {
    Duration::try_from_secs_f32(v).unwrap_or(Duration::ZERO)
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
