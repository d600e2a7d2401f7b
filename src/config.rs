use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{LightScanError, LightScanResult};
use crate::perception::mapper::Rotation;
use crate::perception::types::Size;

const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "LIGHTSCAN_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Detections must score strictly above this to be accepted.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// How long a symbol must stay accepted before it is reported.
    #[serde(default = "default_confirm_delay_ms")]
    pub confirm_delay_ms: u64,
    /// Show the "could not identify" indicator after this long with no detection.
    #[serde(default = "default_no_detection_timeout_ms")]
    pub no_detection_timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            confirm_delay_ms: default_confirm_delay_ms(),
            no_detection_timeout_ms: default_no_detection_timeout_ms(),
        }
    }
}

fn default_confidence_threshold() -> f32 {
    0.97
}

fn default_confirm_delay_ms() -> u64 {
    2000
}

fn default_no_detection_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_buffer_width")]
    pub buffer_width: u32,
    #[serde(default = "default_buffer_height")]
    pub buffer_height: u32,
    #[serde(default)]
    pub rotation: Rotation,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            buffer_width: default_buffer_width(),
            buffer_height: default_buffer_height(),
            rotation: Rotation::default(),
        }
    }
}

fn default_buffer_width() -> u32 {
    640
}

fn default_buffer_height() -> u32 {
    480
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_display_width")]
    pub width: f64,
    #[serde(default = "default_display_height")]
    pub height: f64,
}

impl DisplayConfig {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: default_display_width(),
            height: default_display_height(),
        }
    }
}

fn default_display_width() -> f64 {
    480.0
}

fn default_display_height() -> f64 {
    640.0
}

/// Overlay look, injected into the annotator and handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_scan_window_size")]
    pub scan_window_size: f64,
    /// Bracket leg length as a fraction of the scan window height.
    #[serde(default = "default_corner_fraction")]
    pub corner_fraction: f64,
    #[serde(default = "default_stroke_rgba")]
    pub stroke_rgba: [u8; 4],
    #[serde(default = "default_detection_rgba")]
    pub detection_rgba: [u8; 4],
    #[serde(default = "default_line_width")]
    pub line_width: u32,
    /// Opacity of the black layer outside the scan window.
    #[serde(default = "default_dim_alpha")]
    pub dim_alpha: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            scan_window_size: default_scan_window_size(),
            corner_fraction: default_corner_fraction(),
            stroke_rgba: default_stroke_rgba(),
            detection_rgba: default_detection_rgba(),
            line_width: default_line_width(),
            dim_alpha: default_dim_alpha(),
        }
    }
}

fn default_scan_window_size() -> f64 {
    120.0
}

fn default_corner_fraction() -> f64 {
    0.16
}

fn default_stroke_rgba() -> [u8; 4] {
    [150, 121, 247, 255]
}

fn default_detection_rgba() -> [u8; 4] {
    [0, 255, 0, 102]
}

fn default_line_width() -> u32 {
    5
}

fn default_dim_alpha() -> f32 {
    0.6
}

impl AppConfig {
    pub fn validate(&self) -> LightScanResult<()> {
        let t = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(LightScanError::Config(format!(
                "detection.confidence_threshold must be within [0,1], got {t}"
            )));
        }
        if !(0.0..=0.5).contains(&self.overlay.corner_fraction) {
            return Err(LightScanError::Config(format!(
                "overlay.corner_fraction must be within [0,0.5], got {}",
                self.overlay.corner_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.overlay.dim_alpha) {
            return Err(LightScanError::Config(format!(
                "overlay.dim_alpha must be within [0,1], got {}",
                self.overlay.dim_alpha
            )));
        }
        if self.overlay.scan_window_size < 0.0 {
            return Err(LightScanError::Config(
                "overlay.scan_window_size must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn buffer_size(&self) -> Size {
        Size::new(self.camera.buffer_width as f64, self.camera.buffer_height as f64)
    }
}

/// First existing config file in the search order, if any.
pub fn find_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        let candidate = PathBuf::from(path);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config taken from {CONFIG_ENV}");
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV} points at a missing file");
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Some(candidate);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let candidate = cwd.join(CONFIG_FILE);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in working directory");
            return Some(candidate);
        }
    }

    let candidate = dirs::config_dir()?.join("lightscan").join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in user config dir");
        return Some(candidate);
    }
    None
}

pub fn load_config() -> LightScanResult<AppConfig> {
    let path = find_config_path().ok_or(LightScanError::ConfigNotFound)?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> LightScanResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    tracing::info!(
        path = %path.display(),
        threshold = config.detection.confidence_threshold,
        "config loaded"
    );
    Ok(config)
}

pub fn save_config_to(path: &Path, config: &AppConfig) -> LightScanResult<()> {
    config.validate()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.detection.confidence_threshold, 0.97);
        assert_eq!(cfg.camera.rotation, Rotation::Clockwise90);
        assert_eq!(cfg.overlay.scan_window_size, 120.0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [detection]
            confidence_threshold = 0.9

            [camera]
            rotation = "none"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.detection.confidence_threshold, 0.9);
        assert_eq!(cfg.detection.confirm_delay_ms, 2000);
        assert_eq!(cfg.camera.rotation, Rotation::None);
        assert_eq!(cfg.camera.buffer_width, 640);
    }

    #[test]
    fn save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.detection.confidence_threshold = 0.93;
        cfg.display.width = 390.0;

        save_config_to(&path, &cfg).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[detection]\nconfidence_threshold = 1.5\n").unwrap();
        assert!(matches!(load_config_from(&path), Err(LightScanError::Config(_))));
    }

    #[test]
    fn load_config_follows_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightscan.toml");
        std::fs::write(&path, "[detection]\nconfirm_delay_ms = 1500\n").unwrap();

        std::env::set_var(CONFIG_ENV, &path);
        let loaded = load_config();
        std::env::remove_var(CONFIG_ENV);

        assert_eq!(loaded.unwrap().detection.confirm_delay_ms, 1500);
    }

    #[test]
    fn malformed_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[detection\n").unwrap();
        assert!(matches!(load_config_from(&path), Err(LightScanError::TomlDe(_))));
    }
}
