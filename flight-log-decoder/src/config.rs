//! Session configuration types
//!
//! This module defines the small amount of configuration the orchestration
//! layer needs: which message types a dataflash session decodes up front,
//! and where (and whether) the interactive path exports its results.

use serde::{Deserialize, Serialize};

/// Message types decoded up front by both front ends
///
/// `MSG` appears twice; duplicates are harmless.
pub const DEFAULT_MESSAGE_TYPES: &[&str] = &[
    "CMD", "MSG", "FILE", "MODE", "AHR2", "ATT", "GPS", "POS", "XKQ1", "XKQ", "NKQ1", "NKQ2",
    "XKQ2", "PARM", "MSG", "STAT", "EV", "XKF4", "FNCE",
];

/// Default endpoint of the network export sink
pub const DEFAULT_SINK_URL: &str = "http://localhost:8000/api/process-flight-data";

/// Names of the message types a dataflash backend should decode
///
/// Duplicates are permitted and order carries no meaning. An empty filter
/// means "all types".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTypeFilter(Vec<String>);

impl MessageTypeFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// The built-in filter used by the CLI and the interactive handler
    pub fn builtin() -> Self {
        Self::new(DEFAULT_MESSAGE_TYPES.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if a message type should be decoded
    pub fn matches(&self, name: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|n| n == name)
    }

    /// Distinct names, in first-seen order
    pub fn names(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for name in &self.0 {
            if !seen.contains(&name.as_str()) {
                seen.push(name.as_str());
            }
        }
        seen
    }
}

/// Network export sink settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Endpoint receiving `{"messages": ...}` POST requests
    #[serde(default = "default_sink_url")]
    pub url: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_sink_timeout")]
    pub timeout_ms: u64,

    /// Whether exports are attempted at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_sink_url() -> String {
    DEFAULT_SINK_URL.to_string()
}

fn default_sink_timeout() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: default_sink_url(),
            timeout_ms: default_sink_timeout(),
            enabled: true,
        }
    }
}

impl SinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Builder method: set the request timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Builder method: enable or disable exporting
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Configuration for a parser session and its interactive controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Types decoded up front by dataflash backends
    #[serde(default = "MessageTypeFilter::builtin")]
    pub message_filter: MessageTypeFilter,

    /// Network export sink (None = no exports)
    #[serde(default)]
    pub sink: Option<SinkConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            message_filter: MessageTypeFilter::builtin(),
            sink: None,
        }
    }
}

impl SessionConfig {
    /// Create a new session configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: replace the message type filter
    pub fn with_message_filter(mut self, filter: MessageTypeFilter) -> Self {
        self.message_filter = filter;
        self
    }

    /// Builder method: export results to a network sink
    pub fn with_sink(mut self, sink: SinkConfig) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The sink to export to, if one is configured and enabled
    pub fn active_sink(&self) -> Option<&SinkConfig> {
        self.sink.as_ref().filter(|sink| sink.enabled)
    }
}
