//! Parser session lifecycle
//!
//! A [`ParserSession`] owns at most one backend at a time and tracks where it
//! is in its lifecycle:
//!
//! ```text
//! Idle -> Selecting -> Processing -> Ready <-> Loading
//!              \            \
//!               `-----------`--> Failed
//! ```
//!
//! Only a `Ready` session accepts `load_type` and `trim_file`. A failed
//! session is inert until the next `parse` replaces it.

use crate::config::MessageTypeFilter;
use crate::formats::{Backend, LogBackend, MessageSink};
use crate::selector::select_backend;
use crate::types::{FlightLogError, FormatKind, LogFile, Result, ResultSurface};
use std::collections::BTreeSet;

/// Lifecycle state of a parser session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Selecting,
    Processing,
    Ready,
    Loading,
    Failed,
}

/// One backend plus the bookkeeping needed to drive it
pub struct ParserSession {
    filter: MessageTypeFilter,
    state: SessionState,
    kind: Option<FormatKind>,
    backend: Option<Backend>,
    loaded: BTreeSet<String>,
    trim_cursor: Option<f64>,
}

impl ParserSession {
    /// Create an idle session
    ///
    /// `filter` restricts the types a dataflash backend decodes up front;
    /// other families ignore it.
    pub fn new(filter: MessageTypeFilter) -> Self {
        Self {
            filter,
            state: SessionState::Idle,
            kind: None,
            backend: None,
            loaded: BTreeSet::new(),
            trim_cursor: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Format of the file currently (or last) parsed
    pub fn kind(&self) -> Option<FormatKind> {
        self.kind
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Types decoded through `load_type`
    pub fn loaded_types(&self) -> &BTreeSet<String> {
        &self.loaded
    }

    /// Highest timestamp trimmed so far
    pub fn trim_cursor(&self) -> Option<f64> {
        self.trim_cursor
    }

    /// Select a backend for `file` and decode it, emitting into `sink`
    ///
    /// Any previous backend and its results are discarded first. On error the
    /// session is left in `Failed`.
    pub fn parse(&mut self, file: LogFile, sink: &mut dyn MessageSink) -> Result<()> {
        self.backend = None;
        self.loaded.clear();
        self.trim_cursor = None;
        self.kind = Some(file.kind());
        self.state = SessionState::Selecting;

        let mut backend = match select_backend(file) {
            Ok(backend) => backend,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e);
            }
        };

        self.state = SessionState::Processing;
        let filter = match backend.kind() {
            FormatKind::Dataflash => Some(&self.filter),
            _ => None,
        };

        match backend.process_data(filter, sink) {
            Ok(()) => {
                log::info!("{} log processed", backend.kind());
                self.backend = Some(backend);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to process {} log: {}", backend.kind(), e);
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// Decode a message type that was skipped during `parse`
    ///
    /// Returns whether the type is now decoded; only those are recorded in
    /// [`loaded_types`](Self::loaded_types). A decode error is returned but
    /// leaves the session `Ready`.
    pub fn load_type(&mut self, type_name: &str, sink: &mut dyn MessageSink) -> Result<bool> {
        self.ready_backend("load_type")?;

        self.state = SessionState::Loading;
        let result = match self.backend.as_mut() {
            Some(backend) => backend.load_type(type_name, sink),
            None => Ok(false),
        };
        self.state = SessionState::Ready;

        if let Ok(true) = result {
            self.loaded.insert(type_name.to_string());
        }
        result
    }

    /// Discard records before `timestamp` (ms since boot)
    ///
    /// The cursor only moves forward; an earlier timestamp is a no-op.
    pub fn trim_file(&mut self, timestamp: f64) -> Result<()> {
        let cursor = self.trim_cursor;
        let backend = self.ready_backend("trim_file")?;

        if cursor.is_some_and(|c| timestamp <= c) {
            log::debug!("Trim to {} ms is behind cursor, ignoring", timestamp);
            return Ok(());
        }
        backend.trim_file(timestamp);
        self.trim_cursor = Some(timestamp);
        Ok(())
    }

    /// Snapshot of the backend's results, once ready
    pub fn surface(&self) -> Option<ResultSurface> {
        match (&self.backend, self.state) {
            (Some(backend), SessionState::Ready) => Some(backend.surface()),
            _ => None,
        }
    }

    fn ready_backend(&mut self, action: &str) -> Result<&mut Backend> {
        match (self.state, self.backend.as_mut()) {
            (SessionState::Ready, Some(backend)) => Ok(backend),
            (state, _) => Err(FlightLogError::SessionNotReady(format!(
                "cannot {} while session is {:?}",
                action, state
            ))),
        }
    }
}
