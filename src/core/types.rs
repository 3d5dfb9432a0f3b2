//! Canonical type definitions for the core domain
//!
//! Single source of truth for the records shared by the gateway, the sync
//! stores and the CLI. Everything here is plain data; ownership rules live in
//! the stores that hold them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-issued chat session identifier (opaque)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Chat session metadata as listed by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    pub title: String,
    /// Name of the model last used in this session
    #[serde(default)]
    pub model_used: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Assistant => "Assistant",
        }
    }
}

/// Message identity
///
/// `Local` ids are handed out by the thread controller for entries created
/// before the server has seen them. They are unique for the lifetime of the
/// controller and are what a pending send uses to find its placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    Local(u64),
    Server(String),
}

/// Delivery state of a thread entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Placeholder awaiting the gateway's reply
    Provisional,
    #[default]
    Confirmed,
    /// The request failed; content carries the error text
    Failed,
}

/// A chat message in the active thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub delivery: Delivery,
    /// Tokens reported by the gateway for an assistant reply
    #[serde(default)]
    pub tokens_used: Option<u32>,
}

impl Message {
    /// A user message accepted locally at send time
    pub fn local_user(id: u64, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::Local(id),
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            delivery: Delivery::Confirmed,
            tokens_used: None,
        }
    }

    /// The assistant placeholder shown while a query is outstanding
    pub fn placeholder(id: u64, marker: impl Into<String>) -> Self {
        Self {
            id: MessageId::Local(id),
            role: MessageRole::Assistant,
            content: marker.into(),
            timestamp: Utc::now(),
            delivery: Delivery::Provisional,
            tokens_used: None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.delivery == Delivery::Provisional
    }

    pub fn is_failed(&self) -> bool {
        self.delivery == Delivery::Failed
    }
}

/// Catalog descriptor for an installable model
///
/// Metadata fields are optional because the gateway omits them for entries it
/// has no information about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default)]
    pub installed: bool,
    /// Download size in bytes
    #[serde(default)]
    pub size: Option<u64>,
    /// Parameter count as published, e.g. "7B" or "350M"
    #[serde(default)]
    pub parameters: Option<String>,
    #[serde(default, rename = "type")]
    pub family: Option<String>,
}

impl ModelEntry {
    pub fn new(name: impl Into<String>, installed: bool) -> Self {
        Self {
            name: name.into(),
            installed,
            size: None,
            parameters: None,
            family: None,
        }
    }

    pub fn with_size(mut self, bytes: u64) -> Self {
        self.size = Some(bytes);
        self
    }

    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = Some(parameters.into());
        self
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// Numeric parameter count parsed from the published label
    ///
    /// Accepts a plain number or a number with a K/M/B/T suffix.
    pub fn parameter_count(&self) -> Option<f64> {
        let raw = self.parameters.as_deref()?.trim();
        let (digits, scale) = match raw.chars().last()?.to_ascii_uppercase() {
            'K' => (&raw[..raw.len() - 1], 1e3),
            'M' => (&raw[..raw.len() - 1], 1e6),
            'B' => (&raw[..raw.len() - 1], 1e9),
            'T' => (&raw[..raw.len() - 1], 1e12),
            _ => (raw, 1.0),
        };
        digits.trim().parse::<f64>().ok().map(|n| n * scale)
    }
}

/// Transient install progress for a single catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InstallState {
    #[default]
    Idle,
    Installing,
    Success,
    Error(String),
}

impl InstallState {
    pub fn label(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Installing => "installing",
            Self::Success => "installed",
            Self::Error(_) => "error",
        }
    }
}

/// Catalog projection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Order returned by the gateway
    #[default]
    Catalog,
    Name,
    Size,
    Parameters,
    Family,
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "catalog" | "default" => Ok(Self::Catalog),
            "name" => Ok(Self::Name),
            "size" => Ok(Self::Size),
            "parameters" | "params" => Ok(Self::Parameters),
            "family" | "type" => Ok(Self::Family),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

/// Per-request generation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl GenerationSettings {
    pub const MIN_MAX_TOKENS: u32 = 1;
    pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
    pub const TOP_P_RANGE: (f32, f32) = (0.0, 1.0);

    /// Copy with every field forced into its documented range
    pub fn clamped(self) -> Self {
        let (t_lo, t_hi) = Self::TEMPERATURE_RANGE;
        let (p_lo, p_hi) = Self::TOP_P_RANGE;
        let defaults = Self::default();
        Self {
            max_tokens: self.max_tokens.max(Self::MIN_MAX_TOKENS),
            temperature: if self.temperature.is_finite() {
                self.temperature.clamp(t_lo, t_hi)
            } else {
                defaults.temperature
            },
            top_p: if self.top_p.is_finite() {
                self.top_p.clamp(p_lo, p_hi)
            } else {
                defaults.top_p
            },
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}
