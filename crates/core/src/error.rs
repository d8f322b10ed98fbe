use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
