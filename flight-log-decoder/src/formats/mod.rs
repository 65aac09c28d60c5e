//! Log file format backends (dataflash, tlog, proprietary)
//!
//! Each backend owns the raw bytes of one log and decodes them on demand.
//! Backends never run on construction; decoding starts with
//! [`LogBackend::process_data`] and results are reported through a
//! [`MessageSink`] as well as through the backend's [`ResultSurface`].

use crate::config::MessageTypeFilter;
use crate::types::{BackendMessage, FormatKind, MessageMap, Result, ResultSurface};
use std::sync::mpsc::Sender;

pub mod dataflash;
pub mod proprietary;
pub mod tlog;

// Re-export backend types
pub use dataflash::DataflashBackend;
pub use proprietary::ProprietaryBackend;
pub use tlog::TlogBackend;

/// Destination for messages emitted while a backend decodes
pub trait MessageSink {
    fn post(&mut self, message: BackendMessage);
}

impl MessageSink for Vec<BackendMessage> {
    fn post(&mut self, message: BackendMessage) {
        self.push(message);
    }
}

impl MessageSink for Sender<BackendMessage> {
    fn post(&mut self, message: BackendMessage) {
        if self.send(message).is_err() {
            log::debug!("Message consumer disconnected, dropping message");
        }
    }
}

/// Capability contract every log backend satisfies
pub trait LogBackend {
    /// The format family this backend decodes
    fn kind(&self) -> FormatKind;

    /// Decode the log, emitting batches into `sink`
    ///
    /// Returning `Ok` signals completion: no more batches follow.
    fn process_data(
        &mut self,
        filter: Option<&MessageTypeFilter>,
        sink: &mut dyn MessageSink,
    ) -> Result<()>;

    /// Decode a message type that was skipped by `process_data`
    ///
    /// Returns whether `type_name` is now decoded. Backends that decode
    /// everything eagerly ignore the request and return `false`.
    fn load_type(&mut self, type_name: &str, _sink: &mut dyn MessageSink) -> Result<bool> {
        log::warn!(
            "{} backend decodes every message eagerly, ignoring load request for {}",
            self.kind(),
            type_name
        );
        Ok(false)
    }

    /// Discard decoded records timestamped before `timestamp` (ms since boot)
    fn trim_file(&mut self, timestamp: f64);

    /// Snapshot of the decoded result
    fn surface(&self) -> ResultSurface;
}

/// The closed set of backends, one variant per [`FormatKind`]
pub enum Backend {
    Tlog(TlogBackend),
    Dataflash(DataflashBackend),
    Proprietary(ProprietaryBackend),
}

impl Backend {
    fn inner(&self) -> &dyn LogBackend {
        match self {
            Backend::Tlog(b) => b,
            Backend::Dataflash(b) => b,
            Backend::Proprietary(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn LogBackend {
        match self {
            Backend::Tlog(b) => b,
            Backend::Dataflash(b) => b,
            Backend::Proprietary(b) => b,
        }
    }
}

impl LogBackend for Backend {
    fn kind(&self) -> FormatKind {
        self.inner().kind()
    }

    fn process_data(
        &mut self,
        filter: Option<&MessageTypeFilter>,
        sink: &mut dyn MessageSink,
    ) -> Result<()> {
        self.inner_mut().process_data(filter, sink)
    }

    fn load_type(&mut self, type_name: &str, sink: &mut dyn MessageSink) -> Result<bool> {
        self.inner_mut().load_type(type_name, sink)
    }

    fn trim_file(&mut self, timestamp: f64) {
        self.inner_mut().trim_file(timestamp)
    }

    fn surface(&self) -> ResultSurface {
        self.inner().surface()
    }
}

/// Trim every message in `messages`, returning the number of rows removed
pub(crate) fn trim_messages(messages: &mut MessageMap, timestamp: f64) -> usize {
    messages
        .values_mut()
        .map(|message| message.trim_before(timestamp))
        .sum()
}

/// Emit progress roughly every ten percent of the input
pub(crate) struct ProgressReporter {
    total: usize,
    next_step: usize,
}

impl ProgressReporter {
    const STEP: usize = 10;

    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            next_step: Self::STEP,
        }
    }

    pub(crate) fn update(&mut self, position: usize, sink: &mut dyn MessageSink) {
        if self.total == 0 {
            return;
        }
        let percent = position.saturating_mul(100) / self.total;
        if percent >= self.next_step && self.next_step < 100 {
            sink.post(BackendMessage::Progress {
                percentage: self.next_step as f64,
            });
            while self.next_step <= percent {
                self.next_step += Self::STEP;
            }
        }
    }

    pub(crate) fn finish(&mut self, sink: &mut dyn MessageSink) {
        sink.post(BackendMessage::Progress { percentage: 100.0 });
    }
}
