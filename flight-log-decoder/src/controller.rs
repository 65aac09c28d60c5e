//! Interactive front controller
//!
//! Receives [`Action`]s one at a time, drives a single [`ParserSession`] and
//! forwards every message the backend emits to a downstream consumer. On the
//! way out each message passes an interceptor that feeds the
//! [`AggregationBuffer`] and, when the buffer reports a finished result,
//! exports it to the configured network sink on a background thread.

use crate::aggregator::AggregationBuffer;
use crate::config::SessionConfig;
use crate::export::{spawn_export, NetworkSink};
use crate::formats::MessageSink;
use crate::session::ParserSession;
use crate::types::{BackendMessage, FlightLogError, FormatKind, LogFile, Result};
use serde::Deserialize;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Inbound interactive request
///
/// Deserializes from `{"action": "parse" | "loadType" | "trimFile", ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    /// Replace the session with one decoding `file`
    Parse {
        file: Vec<u8>,
        #[serde(default, rename = "isTlog")]
        is_tlog: bool,
        #[serde(default, rename = "isDji")]
        is_dji: bool,
    },
    /// Decode a type skipped during parsing
    LoadType {
        #[serde(rename = "type")]
        type_name: String,
    },
    /// Discard records before `time` (ms since boot)
    TrimFile { time: f64 },
}

/// Strip an instance suffix: `GPS[0]` -> `GPS`
fn base_type_name(type_name: &str) -> &str {
    match type_name.find('[') {
        Some(i) => &type_name[..i],
        None => type_name,
    }
}

fn ready_session<'a>(
    session: &'a mut Option<ParserSession>,
    action: &str,
) -> Result<&'a mut ParserSession> {
    session
        .as_mut()
        .filter(|session| session.is_ready())
        .ok_or_else(|| FlightLogError::SessionNotReady(format!("ignoring {}", action)))
}

/// Sink wrapper that aggregates and exports before forwarding
struct Interceptor<'a, S: MessageSink> {
    aggregator: &'a mut AggregationBuffer,
    network: Option<&'a Arc<NetworkSink>>,
    exports: &'a mut Vec<JoinHandle<()>>,
    downstream: &'a mut S,
}

impl<S: MessageSink> MessageSink for Interceptor<'_, S> {
    fn post(&mut self, message: BackendMessage) {
        if let Some(messages) = self.aggregator.observe(&message) {
            if let Some(network) = self.network {
                log::debug!("Exporting {} message types to {}", messages.len(), network.url());
                match spawn_export(Arc::clone(network), messages) {
                    Ok(handle) => self.exports.push(handle),
                    Err(e) => log::warn!("{}", e),
                }
            }
        }
        self.downstream.post(message);
    }
}

/// Owner of the single active parser session on the interactive path
pub struct InteractiveController<S: MessageSink> {
    config: SessionConfig,
    session: Option<ParserSession>,
    aggregator: AggregationBuffer,
    network: Option<Arc<NetworkSink>>,
    exports: Vec<JoinHandle<()>>,
    downstream: S,
}

impl<S: MessageSink> InteractiveController<S> {
    /// Create a controller delivering backend messages to `downstream`
    ///
    /// Fails only if the configured network sink cannot be built.
    pub fn new(config: SessionConfig, downstream: S) -> Result<Self> {
        let network = match config.active_sink() {
            Some(sink) => {
                log::info!("Exporting results to {}", sink.url);
                Some(Arc::new(NetworkSink::new(sink)?))
            }
            None => None,
        };

        Ok(Self {
            config,
            session: None,
            aggregator: AggregationBuffer::new(),
            network,
            exports: Vec::new(),
            downstream,
        })
    }

    pub fn session(&self) -> Option<&ParserSession> {
        self.session.as_ref()
    }

    pub fn aggregator(&self) -> &AggregationBuffer {
        &self.aggregator
    }

    pub fn downstream(&self) -> &S {
        &self.downstream
    }

    /// Process one action to completion
    ///
    /// Errors are logged; the controller keeps accepting actions.
    pub fn handle(&mut self, action: Action) {
        self.exports.retain(|handle| !handle.is_finished());

        let result = match action {
            Action::Parse {
                file,
                is_tlog,
                is_dji,
            } => self.parse(file, FormatKind::from_flags(is_tlog, is_dji)),
            Action::LoadType { type_name } => self.load_type(&type_name),
            Action::TrimFile { time } => self.trim_file(time),
        };

        match result {
            Ok(()) => {}
            Err(FlightLogError::SessionNotReady(reason)) => {
                log::warn!("parser not ready: {}", reason)
            }
            Err(e) => log::error!("{}", e),
        }
    }

    fn parse(&mut self, file: Vec<u8>, kind: FormatKind) -> Result<()> {
        log::info!("Parsing {} log ({} bytes)", kind, file.len());
        self.aggregator.reset();

        let session = self
            .session
            .insert(ParserSession::new(self.config.message_filter.clone()));
        let mut sink = Interceptor {
            aggregator: &mut self.aggregator,
            network: self.network.as_ref(),
            exports: &mut self.exports,
            downstream: &mut self.downstream,
        };
        session.parse(LogFile::new(file, kind), &mut sink)
    }

    fn load_type(&mut self, type_name: &str) -> Result<()> {
        let name = base_type_name(type_name);
        let session = ready_session(&mut self.session, "loadType")?;

        let mut sink = Interceptor {
            aggregator: &mut self.aggregator,
            network: self.network.as_ref(),
            exports: &mut self.exports,
            downstream: &mut self.downstream,
        };
        if !session.load_type(name, &mut sink)? {
            log::debug!("{} was not decoded", name);
        }
        Ok(())
    }

    fn trim_file(&mut self, time: f64) -> Result<()> {
        ready_session(&mut self.session, "trimFile")?.trim_file(time)
    }

    /// Wait for every outstanding export to finish
    pub fn flush_exports(&mut self) {
        for handle in self.exports.drain(..) {
            if handle.join().is_err() {
                log::warn!("Export thread panicked");
            }
        }
    }

    /// Handle actions until every sender is dropped, then flush exports
    ///
    /// Returns the downstream consumer.
    pub fn run(mut self, actions: Receiver<Action>) -> S {
        for action in actions {
            self.handle(action);
        }
        log::debug!("Action channel closed, waiting for exports");
        self.flush_exports();
        self.downstream
    }
}

impl<S: MessageSink + Send + 'static> InteractiveController<S> {
    /// Run the controller on its own thread
    ///
    /// Actions sent on the returned channel are handled strictly in order.
    pub fn spawn(self) -> Result<(Sender<Action>, JoinHandle<S>)> {
        let (tx, rx) = channel();
        let handle = thread::Builder::new()
            .name("flight-controller".to_string())
            .spawn(move || self.run(rx))?;
        Ok((tx, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn controller() -> InteractiveController<Vec<BackendMessage>> {
        InteractiveController::new(SessionConfig::new(), Vec::new()).unwrap()
    }

    #[test]
    fn test_action_wire_format() {
        let parse: Action =
            serde_json::from_str(r#"{"action":"parse","file":[1,2,3],"isTlog":true}"#).unwrap();
        assert_eq!(
            parse,
            Action::Parse {
                file: vec![1, 2, 3],
                is_tlog: true,
                is_dji: false
            }
        );

        let load: Action = serde_json::from_str(r#"{"action":"loadType","type":"GPS[0]"}"#).unwrap();
        assert_eq!(
            load,
            Action::LoadType {
                type_name: "GPS[0]".to_string()
            }
        );

        let trim: Action = serde_json::from_str(r#"{"action":"trimFile","time":1500}"#).unwrap();
        assert_eq!(trim, Action::TrimFile { time: 1500.0 });

        assert!(serde_json::from_str::<Action>(r#"{"action":"explode"}"#).is_err());
    }

    #[test]
    fn test_base_type_name() {
        assert_eq!(base_type_name("GPS[0]"), "GPS");
        assert_eq!(base_type_name("ATT"), "ATT");
        assert_eq!(base_type_name("[1]"), "");
    }

    #[test]
    fn test_actions_before_parse_are_ignored() {
        let mut controller = controller();
        controller.handle(Action::LoadType {
            type_name: "GPS".to_string(),
        });
        controller.handle(Action::TrimFile { time: 10.0 });

        assert!(controller.session().is_none());
        assert!(controller.downstream().is_empty());
    }

    #[test]
    fn test_tlog_flag_selects_tlog() {
        let mut controller = controller();
        controller.handle(Action::Parse {
            file: vec![0u8; 4],
            is_tlog: true,
            is_dji: true,
        });

        let session = controller.session().unwrap();
        assert_eq!(session.kind(), Some(FormatKind::Tlog));
        assert_eq!(session.state(), SessionState::Ready);
        assert!(controller.aggregator().is_complete());
        // Messages reach the consumer unchanged
        assert!(matches!(
            controller.downstream().last(),
            Some(BackendMessage::Bulk { messages }) if messages.is_empty()
        ));
    }

    #[test]
    fn test_failed_parse_keeps_controller_alive() {
        let mut controller = controller();
        controller.handle(Action::Parse {
            file: Vec::new(),
            is_tlog: false,
            is_dji: false,
        });
        assert_eq!(controller.session().unwrap().state(), SessionState::Failed);

        // Later actions are rejected, not fatal
        controller.handle(Action::TrimFile { time: 1.0 });
        assert_eq!(controller.session().unwrap().state(), SessionState::Failed);
    }

    #[test]
    fn test_run_drains_channel() {
        let (tx, handle) = controller().spawn().unwrap();
        tx.send(Action::Parse {
            file: vec![0u8; 4],
            is_tlog: true,
            is_dji: false,
        })
        .unwrap();
        tx.send(Action::TrimFile { time: 5.0 }).unwrap();
        drop(tx);

        let delivered = handle.join().unwrap();
        assert!(delivered
            .iter()
            .any(|m| matches!(m, BackendMessage::Bulk { .. })));
    }
}
