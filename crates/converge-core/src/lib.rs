use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// One message from the agent backend's reply stream.
///
/// The wire payload stays opaque. The rest of the workspace only ever sees
/// the `type` tag and whatever displayable text the payload carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentMessage {
    raw: Value,
}

impl AgentMessage {
    pub fn from_json_line(line: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(line)?;
        Ok(Self { raw })
    }

    /// The backend's `type` tag, or "unknown" when absent.
    pub fn kind(&self) -> &str {
        self.raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    /// Displayable text carried by the message, if any.
    ///
    /// Assistant messages yield their concatenated text blocks, result
    /// messages their result string. Other kinds have no text form.
    pub fn text(&self) -> Option<String> {
        match self.kind() {
            "assistant" => {
                let blocks = self.raw.get("message")?.get("content")?.as_array()?;
                let text: Vec<&str> = blocks
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect();
                if text.is_empty() {
                    None
                } else {
                    Some(text.join(""))
                }
            }
            "result" => self
                .raw
                .get("result")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }
}

impl fmt::Display for AgentMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text() {
            Some(text) => f.write_str(&text),
            None => write!(f, "{}", self.raw),
        }
    }
}

/// Word-count-derived usage estimate for one run.
///
/// A heuristic approximation, not an authoritative token count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    pub estimated_input_tokens: f64,
    pub estimated_output_tokens: f64,
    pub total_estimated_cost: f64,
    pub duration_seconds: f64,
}

impl CostEstimate {
    /// Multi-line summary persisted alongside the prompt.
    pub fn summary(&self) -> String {
        format!(
            "Input Tokens: {:.1}\nOutput Tokens: {:.1}\nTotal Cost: ${:.6}\nDuration: {:.2} seconds",
            self.estimated_input_tokens,
            self.estimated_output_tokens,
            self.total_estimated_cost,
            self.duration_seconds
        )
    }
}

#[derive(Error, Debug)]
pub enum ConvergeError {
    #[error("Agent backend error: {0}")]
    AgentError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Recording failed: {0}")]
    RecordError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConvergeError>;
