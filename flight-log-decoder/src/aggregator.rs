//! Accumulation of decoded messages on the interactive path
//!
//! Backends deliver results either one type at a time (`Batch`, closed by
//! `DoneLoading`) or all at once (`Bulk`). The [`AggregationBuffer`] folds both
//! styles into a single `type -> Message` map and reports when that map should
//! be exported.

use crate::types::{BackendMessage, MessageMap};
use std::collections::BTreeSet;

/// Decoded messages gathered for the current session
#[derive(Debug, Clone, Default)]
pub struct AggregationBuffer {
    messages: MessageMap,
    /// Types delivered by a bulk map; later batches never override them
    bulk_types: BTreeSet<String>,
    complete: bool,
}

impl AggregationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one outbound backend message into the buffer
    ///
    /// Returns the map to export when `message` completes a non-empty
    /// result: a non-empty `Bulk`, or `DoneLoading` after at least one batch.
    pub fn observe(&mut self, message: &BackendMessage) -> Option<MessageMap> {
        match message {
            BackendMessage::Batch {
                message_type,
                message_list,
            } => {
                if self.bulk_types.contains(message_type) {
                    log::debug!("Ignoring batch for {}, bulk result is final", message_type);
                } else {
                    self.messages
                        .insert(message_type.clone(), message_list.clone());
                }
                None
            }
            BackendMessage::Bulk { messages } => {
                self.messages = messages.clone();
                self.bulk_types = messages.keys().cloned().collect();
                self.complete = true;
                (!messages.is_empty()).then(|| messages.clone())
            }
            BackendMessage::DoneLoading { .. } => {
                self.complete = true;
                (!self.messages.is_empty()).then(|| self.messages.clone())
            }
            _ => None,
        }
    }

    /// Drop everything gathered so far
    pub fn reset(&mut self) {
        self.messages.clear();
        self.bulk_types.clear();
        self.complete = false;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn messages(&self) -> &MessageMap {
        &self.messages
    }
}
