//! Wire format of the control channel. Every request is one JSON object
//! tagged by `type`; submit replies are a JSON array of responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Submit(SubmitRequest),
    Stop(StopRequest),
    Pause(PauseRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub ids: Vec<String>,
    /// Raw items, decoded one by one so a bad item doesn't sink the request.
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub options: SubmitOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOptions {
    #[serde(default)]
    pub hide_result: bool,
    #[serde(default)]
    pub downscale_to: Option<f64>,
    #[serde(default)]
    pub speed_factor: Option<f64>,
    #[serde(default)]
    pub aggressive: Option<bool>,
    #[serde(default)]
    pub copy_to_clipboard: bool,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "cli".to_string()
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            hide_result: false,
            downscale_to: None,
            speed_factor: None,
            aggressive: None,
            copy_to_clipboard: false,
            source: default_source(),
        }
    }
}

impl SubmitOptions {
    /// Downscale and speed factors must lie in (0, 1].
    pub fn validate(&self) -> Result<(), String> {
        check_factor("downscale_to", self.downscale_to)?;
        check_factor("speed_factor", self.speed_factor)
    }
}

fn check_factor(name: &str, factor: Option<f64>) -> Result<(), String> {
    match factor {
        Some(f) if !(f > 0.0 && f <= 1.0) => Err(format!("{} must be in (0, 1], got {}", name, f)),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub remove: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseScope {
    /// Skip the next file the watchers would handle.
    NextEvent,
    /// Stop watching until resumed.
    All,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRequest {
    pub scope: PauseScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ItemReference {
    Path(PathBuf),
    Url(String),
    Data(String),
}

impl ItemReference {
    /// Classifies a bare string: urls, then paths, then inline data.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.starts_with("http://") || text.starts_with("https://") {
            return Self::Url(text.to_string());
        }
        if let Some(path) = text.strip_prefix("file://") {
            return Self::Path(PathBuf::from(path));
        }
        if text.starts_with('/') || text.starts_with('~') {
            return Self::Path(optiwatch_core::path_utils::get_path(text));
        }
        if !text.is_empty() && std::path::Path::new(text).exists() {
            return Self::Path(PathBuf::from(text));
        }
        Self::Data(text.to_string())
    }

    pub fn decode(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self::parse(text)),
            Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisationResponse {
    pub id: String,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl OptimisationResponse {
    pub fn success(id: impl Into<String>, result: Option<String>) -> Self {
        Self {
            id: id.into(),
            status: ResponseStatus::Success,
            error: None,
            result,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ResponseStatus::Failure,
            error: Some(error.into()),
            result: None,
        }
    }
}

impl SubmitRequest {
    /// Decodes every item and pairs it with the id at the same index. A
    /// missing id falls back to the item's own text. Undecodable items are
    /// dropped.
    pub fn resolve_items(&self) -> Vec<(String, ItemReference)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                let Some(item) = ItemReference::decode(raw) else {
                    warn!("📡 Control: Dropping undecodable item {}", raw);
                    return None;
                };
                let id = self.ids.get(index).cloned().unwrap_or_else(|| match raw {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                });
                Some((id, item))
            })
            .collect()
    }
}
