use thiserror::Error;

#[derive(Debug, Error)]
pub enum LightScanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Invalid detection: {0}")]
    InvalidDetection(String),

    #[error("Replay error: {0}")]
    Replay(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("No config.toml found (searched LIGHTSCAN_CONFIG, executable dir, working dir, user config dir)")]
    ConfigNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type LightScanResult<T> = Result<T, LightScanError>;
