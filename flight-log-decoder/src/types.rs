//! Core types for the flight log decoder library
//!
//! This module defines the data model shared by every backend and by the
//! orchestration layer: the input file and its format tag, the column-oriented
//! message representation, the messages a backend emits while decoding, and
//! the error taxonomy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, FlightLogError>;

/// Column carrying the per-record time in milliseconds since boot
pub const TIME_FIELD: &str = "time_boot_ms";

/// Decoded messages keyed by message type name (e.g. "ATT", "GPS[0]")
pub type MessageMap = BTreeMap<String, Message>;

/// Arbitrary decode-time facts reported by a backend
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Log family tag selecting which backend decodes a file
///
/// Always supplied by the caller; the library never sniffs file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// MAVLink telemetry log (.tlog)
    Tlog,
    /// DataFlash flight-controller log (.bin)
    Dataflash,
    /// Proprietary drone flight record (DJI .txt)
    Proprietary,
}

impl FormatKind {
    /// Derive the format from the interactive protocol flags
    ///
    /// Dataflash is the default when neither flag is set. The tlog flag is
    /// checked first, so it wins when both are set.
    pub fn from_flags(is_tlog: bool, is_dji: bool) -> Self {
        if is_tlog {
            FormatKind::Tlog
        } else if is_dji {
            FormatKind::Proprietary
        } else {
            FormatKind::Dataflash
        }
    }

    /// Short lowercase name used in logs and metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Tlog => "tlog",
            FormatKind::Dataflash => "dataflash",
            FormatKind::Proprietary => "proprietary",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FormatKind {
    type Err = FlightLogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tlog" => Ok(FormatKind::Tlog),
            "dataflash" | "bin" => Ok(FormatKind::Dataflash),
            "proprietary" | "dji" => Ok(FormatKind::Proprietary),
            other => Err(FlightLogError::InvalidInput(format!(
                "Unrecognized log format tag: {:?}",
                other
            ))),
        }
    }
}

/// Raw log bytes together with the format they were tagged with
///
/// Immutable once loaded; ownership moves into the backend that decodes it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFile {
    bytes: Vec<u8>,
    kind: FormatKind,
}

impl LogFile {
    /// Wrap an in-memory transfer
    pub fn new(bytes: Vec<u8>, kind: FormatKind) -> Self {
        Self { bytes, kind }
    }

    /// Read a log file from disk
    pub fn read(path: &Path, kind: FormatKind) -> Result<Self> {
        log::info!("Reading {} log: {:?}", kind, path);
        let bytes = std::fs::read(path)?;
        Ok(Self::new(bytes, kind))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the file and hand out its buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// One column of a decoded message
///
/// Numeric columns keep the fixed-width element type the backend decoded
/// them with. `Text` holds string columns and `Value` anything else; both
/// pass through export unchanged. A `Value` array holds one entry per row,
/// any other `Value` is a scalar attached to the message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldData {
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    Int64(Vec<i64>),
    Int32(Vec<i32>),
    Int16(Vec<i16>),
    Int8(Vec<i8>),
    Uint64(Vec<u64>),
    Uint32(Vec<u32>),
    Uint16(Vec<u16>),
    Uint8(Vec<u8>),
    Text(Vec<String>),
    Value(serde_json::Value),
}

/// Apply the same expression to every vector-backed column
macro_rules! each_column {
    ($data:expr, |$v:ident| $body:expr, $value:pat => $fallback:expr) => {
        match $data {
            FieldData::Float64($v) => $body,
            FieldData::Float32($v) => $body,
            FieldData::Int64($v) => $body,
            FieldData::Int32($v) => $body,
            FieldData::Int16($v) => $body,
            FieldData::Int8($v) => $body,
            FieldData::Uint64($v) => $body,
            FieldData::Uint32($v) => $body,
            FieldData::Uint16($v) => $body,
            FieldData::Uint8($v) => $body,
            FieldData::Text($v) => $body,
            FieldData::Value($value) => $fallback,
        }
    };
}

/// Rebuild a column of the same variant from an expression over its vector
macro_rules! rebuild_column {
    ($data:expr, |$v:ident| $body:expr) => {
        match $data {
            FieldData::Float64($v) => FieldData::Float64($body),
            FieldData::Float32($v) => FieldData::Float32($body),
            FieldData::Int64($v) => FieldData::Int64($body),
            FieldData::Int32($v) => FieldData::Int32($body),
            FieldData::Int16($v) => FieldData::Int16($body),
            FieldData::Int8($v) => FieldData::Int8($body),
            FieldData::Uint64($v) => FieldData::Uint64($body),
            FieldData::Uint32($v) => FieldData::Uint32($body),
            FieldData::Uint16($v) => FieldData::Uint16($body),
            FieldData::Uint8($v) => FieldData::Uint8($body),
            FieldData::Text($v) => FieldData::Text($body),
            FieldData::Value(value) => FieldData::Value(value.clone()),
        }
    };
}

impl FieldData {
    /// True for fixed-width numeric columns (the ones export must convert)
    pub fn is_numeric_array(&self) -> bool {
        !matches!(self, FieldData::Text(_) | FieldData::Value(_))
    }

    /// Number of samples, or None for a scalar
    pub fn len(&self) -> Option<usize> {
        each_column!(self, |v| Some(v.len()), value => value.as_array().map(Vec::len))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Sample `index` widened to f64, if this is a numeric column
    pub fn value_at(&self, index: usize) -> Option<f64> {
        match self {
            FieldData::Float64(v) => v.get(index).copied(),
            FieldData::Float32(v) => v.get(index).map(|x| *x as f64),
            FieldData::Int64(v) => v.get(index).map(|x| *x as f64),
            FieldData::Int32(v) => v.get(index).map(|x| *x as f64),
            FieldData::Int16(v) => v.get(index).map(|x| *x as f64),
            FieldData::Int8(v) => v.get(index).map(|x| *x as f64),
            FieldData::Uint64(v) => v.get(index).map(|x| *x as f64),
            FieldData::Uint32(v) => v.get(index).map(|x| *x as f64),
            FieldData::Uint16(v) => v.get(index).map(|x| *x as f64),
            FieldData::Uint8(v) => v.get(index).map(|x| *x as f64),
            FieldData::Text(_) | FieldData::Value(_) => None,
        }
    }

    /// Drop the first `count` samples
    pub fn drain_front(&mut self, count: usize) {
        each_column!(self, |v| {
            let end = count.min(v.len());
            v.drain(..end);
        }, value => {
            if let Some(items) = value.as_array_mut() {
                let end = count.min(items.len());
                items.drain(..end);
            }
        })
    }

    /// Copy the samples at `indices`, in order
    pub fn select(&self, indices: &[usize]) -> FieldData {
        if let FieldData::Value(serde_json::Value::Array(items)) = self {
            return FieldData::Value(serde_json::Value::Array(
                indices.iter().filter_map(|&i| items.get(i).cloned()).collect(),
            ));
        }
        rebuild_column!(self, |v| indices
            .iter()
            .filter_map(|&i| v.get(i).cloned())
            .collect())
    }

    /// Convert to a JSON-safe value
    ///
    /// Numeric columns become plain arrays of numbers; non-finite floats map
    /// to `null` like any JSON encoder does. Text and pass-through values are
    /// returned unchanged.
    pub fn to_portable(&self) -> serde_json::Value {
        use serde_json::Value;

        fn float(x: f64) -> Value {
            serde_json::Number::from_f64(x)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }

        match self {
            FieldData::Float64(v) => Value::Array(v.iter().map(|x| float(*x)).collect()),
            FieldData::Float32(v) => Value::Array(v.iter().map(|x| float(*x as f64)).collect()),
            FieldData::Int64(v) => Value::Array(v.iter().map(|x| Value::from(*x)).collect()),
            FieldData::Int32(v) => Value::Array(v.iter().map(|x| Value::from(*x)).collect()),
            FieldData::Int16(v) => Value::Array(v.iter().map(|x| Value::from(*x)).collect()),
            FieldData::Int8(v) => Value::Array(v.iter().map(|x| Value::from(*x)).collect()),
            FieldData::Uint64(v) => Value::Array(v.iter().map(|x| Value::from(*x)).collect()),
            FieldData::Uint32(v) => Value::Array(v.iter().map(|x| Value::from(*x)).collect()),
            FieldData::Uint16(v) => Value::Array(v.iter().map(|x| Value::from(*x)).collect()),
            FieldData::Uint8(v) => Value::Array(v.iter().map(|x| Value::from(*x)).collect()),
            FieldData::Text(v) => Value::Array(v.iter().cloned().map(Value::String).collect()),
            FieldData::Value(value) => value.clone(),
        }
    }
}

/// A decoded message type: field name → column
///
/// The type tag is the key under which the message is stored in a
/// [`MessageMap`]. Columns of one message are row-aligned.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Message {
    fields: BTreeMap<String, FieldData>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add a column
    pub fn with_field(mut self, name: impl Into<String>, data: FieldData) -> Self {
        self.insert(name, data);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, data: FieldData) {
        self.fields.insert(name.into(), data);
    }

    pub fn field(&self, name: &str) -> Option<&FieldData> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldData)> {
        self.fields.iter()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Number of rows (length of the time column, else the longest column)
    pub fn len(&self) -> usize {
        if let Some(len) = self.field(TIME_FIELD).and_then(FieldData::len) {
            return len;
        }
        self.fields.values().filter_map(FieldData::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every row whose time is before `timestamp`
    ///
    /// Rows are assumed to be in time order. Returns the number of rows
    /// removed; messages without a time column are left untouched.
    pub fn trim_before(&mut self, timestamp: f64) -> usize {
        let Some(time) = self.fields.get(TIME_FIELD) else {
            return 0;
        };
        let rows = time.len().unwrap_or(0);
        let cut = (0..rows)
            .find(|&i| time.value_at(i).map_or(true, |t| t >= timestamp))
            .unwrap_or(rows);

        if cut > 0 {
            for column in self.fields.values_mut() {
                if column.len() == Some(rows) {
                    column.drain_front(cut);
                }
            }
        }
        cut
    }

    /// Copy the rows at `indices` into a new message
    pub fn select_rows(&self, indices: &[usize]) -> Message {
        Message {
            fields: self
                .fields
                .iter()
                .map(|(name, column)| (name.clone(), column.select(indices)))
                .collect(),
        }
    }

    /// JSON-safe projection with every numeric column as a plain array
    pub fn to_portable(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(name, column)| (name.clone(), column.to_portable()))
                .collect(),
        )
    }
}

/// A file embedded in a log (images in proprietary flight records)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedFile {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

/// Messages a backend emits while decoding
///
/// Serializes to the exact shapes the interactive protocol delivers to its
/// consumer, e.g. `{"messageType": "ATT", "messageList": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BackendMessage {
    /// One message type decoded incrementally
    Batch {
        #[serde(rename = "messageType")]
        message_type: String,
        #[serde(rename = "messageList")]
        message_list: Message,
    },
    /// Every decoded message type at once
    Bulk { messages: MessageMap },
    /// No further incremental batches will follow
    DoneLoading {
        #[serde(rename = "messagesDoneLoading")]
        messages_done_loading: bool,
    },
    /// Decode progress in percent
    Progress { percentage: f64 },
    /// Message types present in the source
    AvailableMessages {
        #[serde(rename = "availableMessages")]
        available_messages: Vec<String>,
    },
    Metadata { metadata: Metadata },
    Files { files: Vec<EmbeddedFile> },
}

impl BackendMessage {
    /// Convenience constructor for the completion signal
    pub fn done_loading() -> Self {
        BackendMessage::DoneLoading {
            messages_done_loading: true,
        }
    }
}

/// Everything a backend exposes once processing has finished
///
/// Decoded messages appear under `messages` for most families and under the
/// alternate `messages_list` for others; readers must check both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSurface {
    pub metadata: Metadata,
    pub messages: Option<MessageMap>,
    pub messages_list: Option<MessageMap>,
    pub files: Vec<EmbeddedFile>,
    pub available_messages: Vec<String>,
}

/// Errors that can occur while decoding or exporting
#[derive(Debug, thiserror::Error)]
pub enum FlightLogError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parser not ready: {0}")]
    SessionNotReady(String),

    #[error("Failed to decode log: {0}")]
    DecodeFailure(String),

    #[error("Failed to write export file {path:?}: {source}")]
    ExportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send export: {0}")]
    ExportNetwork(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
