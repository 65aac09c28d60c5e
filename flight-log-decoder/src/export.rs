//! Export of decoded results
//!
//! Two destinations are supported:
//! - **File**: the full [`ExportPayload`] as pretty-printed JSON (CLI path)
//! - **Network**: `{"messages": ...}` POSTed to an HTTP endpoint
//!   (interactive path, fire-and-forget)
//!
//! Typed numeric columns are converted to plain JSON arrays before either
//! destination sees them.

use crate::config::SinkConfig;
use crate::types::{
    EmbeddedFile, FlightLogError, MessageMap, Metadata, Result, ResultSurface,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// JSON object keyed by message type, every column a plain array
pub type PortableMessages = serde_json::Map<String, serde_json::Value>;

/// JSON-safe projection of a session result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub metadata: Metadata,
    pub messages: PortableMessages,
    pub files: Vec<EmbeddedFile>,
    pub available_messages: Vec<String>,
}

impl ExportPayload {
    /// Build the payload from a backend's result surface
    ///
    /// Messages are taken from `messages`, then `messages_list`, then an
    /// empty map, in that order.
    pub fn from_surface(surface: &ResultSurface) -> Self {
        let messages = surface
            .messages
            .as_ref()
            .or(surface.messages_list.as_ref())
            .map(normalize_messages)
            .unwrap_or_default();

        Self {
            metadata: surface.metadata.clone(),
            messages,
            files: surface.files.clone(),
            available_messages: surface.available_messages.clone(),
        }
    }
}

/// Convert every message to its portable JSON form
pub fn normalize_messages(messages: &MessageMap) -> PortableMessages {
    messages
        .iter()
        .map(|(name, message)| (name.clone(), message.to_portable()))
        .collect()
}

/// Where an export goes
#[derive(Debug, Clone)]
pub enum ExportDestination {
    File(PathBuf),
    Network(SinkConfig),
}

/// Deliver `payload` to `destination`
///
/// Network delivery only carries the `messages` part of the payload.
pub fn export(payload: &ExportPayload, destination: &ExportDestination) -> Result<()> {
    match destination {
        ExportDestination::File(path) => FileSink::new(path).write(payload),
        ExportDestination::Network(config) => NetworkSink::new(config)?.send(&payload.messages),
    }
}

/// Writes export payloads to a JSON file
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `payload` as pretty-printed JSON, replacing any existing file
    pub fn write(&self, payload: &ExportPayload) -> Result<()> {
        log::info!("Writing results to {:?}", self.path);

        let file = File::create(&self.path).map_err(|e| self.io_error(e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, payload).map_err(|e| self.io_error(e.into()))?;
        writer.flush().map_err(|e| self.io_error(e))?;

        log::info!(
            "Wrote {} message types to {:?}",
            payload.messages.len(),
            self.path
        );
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> FlightLogError {
        FlightLogError::ExportIo {
            path: self.path.clone(),
            source,
        }
    }
}

/// POSTs decoded messages to an HTTP endpoint
pub struct NetworkSink {
    client: reqwest::blocking::Client,
    url: String,
}

impl NetworkSink {
    /// Build a sink with the configured URL and request timeout
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                FlightLogError::ExportNetwork(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `{"messages": messages}`; only the response status is checked
    pub fn send(&self, messages: &PortableMessages) -> Result<()> {
        let body = serde_json::json!({ "messages": messages });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| {
                FlightLogError::ExportNetwork(format!("request to {} failed: {}", self.url, e))
            })?;

        if !resp.status().is_success() {
            return Err(FlightLogError::ExportNetwork(format!(
                "HTTP {} from {}",
                resp.status(),
                self.url
            )));
        }

        log::info!("Exported {} message types to {}", messages.len(), self.url);
        Ok(())
    }
}

/// Export `messages` on a background thread
///
/// Delivery failures are logged on that thread and never reach the caller.
/// The handle may be joined to wait for delivery or dropped to detach.
pub fn spawn_export(sink: Arc<NetworkSink>, messages: MessageMap) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("flight-export".to_string())
        .spawn(move || {
            let portable = normalize_messages(&messages);
            if let Err(e) = sink.send(&portable) {
                log::warn!("Export failed: {}", e);
            }
        })
        .map_err(|e| FlightLogError::ExportNetwork(format!("failed to spawn export thread: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldData, Message, TIME_FIELD};
    use std::net::TcpListener;

    fn att() -> Message {
        Message::new()
            .with_field(TIME_FIELD, FieldData::Float64(vec![1.0, 2.0]))
            .with_field("Roll", FieldData::Int16(vec![-1, 1]))
    }

    fn surface() -> ResultSurface {
        let mut messages = MessageMap::new();
        messages.insert("ATT".to_string(), att());
        ResultSurface {
            messages: Some(messages),
            available_messages: vec!["ATT".to_string()],
            ..ResultSurface::default()
        }
    }

    #[test]
    fn test_payload_prefers_messages() {
        let payload = ExportPayload::from_surface(&surface());
        assert_eq!(
            serde_json::Value::Object(payload.messages),
            serde_json::json!({"ATT": {"Roll": [-1, 1], "time_boot_ms": [1.0, 2.0]}})
        );
    }

    #[test]
    fn test_payload_falls_back_to_messages_list() {
        let mut surface = surface();
        surface.messages_list = surface.messages.take();
        let payload = ExportPayload::from_surface(&surface);
        assert!(payload.messages.contains_key("ATT"));

        let empty = ExportPayload::from_surface(&ResultSurface::default());
        assert!(empty.messages.is_empty());
    }

    #[test]
    fn test_payload_keys() {
        let json = serde_json::to_value(ExportPayload::from_surface(&surface())).unwrap();
        let mut keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["availableMessages", "files", "messages", "metadata"]);
    }

    #[test]
    fn test_file_sink_writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let payload = ExportPayload::from_surface(&surface());

        export(&payload, &ExportDestination::File(path.clone())).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n  \""));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["messages"]["ATT"]["Roll"], serde_json::json!([-1, 1]));
    }

    #[test]
    fn test_file_sink_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.json");
        let err = FileSink::new(&path)
            .write(&ExportPayload::from_surface(&surface()))
            .unwrap_err();
        assert!(matches!(err, FlightLogError::ExportIo { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_unreachable_endpoint_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let sink = NetworkSink::new(&SinkConfig::new(url).with_timeout_ms(500)).unwrap();
        let err = sink.send(&PortableMessages::new()).unwrap_err();
        assert!(matches!(err, FlightLogError::ExportNetwork(_)));
    }
}
