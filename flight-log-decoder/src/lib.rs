//! Flight Log Decoder Library
//!
//! Decodes binary drone/flight-controller telemetry logs (MAVLink tlog,
//! DataFlash .bin, DJI flight records) into column-oriented messages and
//! exports them as JSON.
//!
//! # Architecture
//!
//! - A [`LogFile`] is tagged with a [`FormatKind`] by the caller; the
//!   selector maps the tag to exactly one backend
//! - A [`ParserSession`] owns that backend and drives it through
//!   processing, deferred type loading and trimming
//! - On the interactive path an [`InteractiveController`] receives
//!   [`Action`]s, aggregates what the backend emits and exports finished
//!   results to an HTTP endpoint
//! - On the batch path the result surface is turned into an
//!   [`ExportPayload`] and written to a file
//!
//! Decoded messages map field names to typed columns; every message carries
//! a `time_boot_ms` column where the source format provides a time.
//!
//! # Example Usage
//!
//! ```no_run
//! use flight_log_decoder::{
//!     BackendMessage, ExportPayload, FileSink, FormatKind, LogFile, MessageTypeFilter,
//!     ParserSession,
//! };
//! use std::path::Path;
//!
//! let file = LogFile::read(Path::new("flight.bin"), FormatKind::Dataflash).unwrap();
//!
//! let mut session = ParserSession::new(MessageTypeFilter::builtin());
//! let mut emitted: Vec<BackendMessage> = Vec::new();
//! session.parse(file, &mut emitted).unwrap();
//!
//! let surface = session.surface().unwrap();
//! FileSink::new("flight_processed.json")
//!     .write(&ExportPayload::from_surface(&surface))
//!     .unwrap();
//! ```

// Public modules
pub mod aggregator;
pub mod config;
pub mod controller;
pub mod export;
pub mod formats;
pub mod selector;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use aggregator::AggregationBuffer;
pub use config::{MessageTypeFilter, SessionConfig, SinkConfig, DEFAULT_MESSAGE_TYPES};
pub use controller::{Action, InteractiveController};
pub use export::{export, ExportDestination, ExportPayload, FileSink, NetworkSink};
pub use formats::{Backend, LogBackend, MessageSink};
pub use selector::select_backend;
pub use session::{ParserSession, SessionState};
pub use types::{
    BackendMessage, EmbeddedFile, FieldData, FlightLogError, FormatKind, LogFile, Message,
    MessageMap, Metadata, Result, ResultSurface, TIME_FIELD,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
