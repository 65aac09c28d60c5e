//! Interactive protocol over stdio
//!
//! Each stdin line holds one JSON action; each backend message is written to
//! stdout as one JSON line. Besides the raw-bytes form, `parse` accepts a
//! `"path"` to read the log from disk:
//!
//! ```text
//! {"action": "parse", "path": "flight.tlog", "isTlog": true}
//! {"action": "loadType", "type": "GPS[0]"}
//! {"action": "trimFile", "time": 120000}
//! ```

use anyhow::{anyhow, bail, Context, Result};
use flight_log_decoder::{Action, BackendMessage, InteractiveController, MessageSink, SessionConfig};
use serde::Deserialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// `parse` request naming a file instead of carrying its bytes
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParsePath {
    action: String,
    path: PathBuf,
    #[serde(default)]
    is_tlog: bool,
    #[serde(default)]
    is_dji: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    Path(ParsePath),
    Action(Action),
}

/// Writes each backend message to stdout as a JSON line
struct StdoutSink;

impl MessageSink for StdoutSink {
    fn post(&mut self, message: BackendMessage) {
        let mut out = io::stdout().lock();
        let written = serde_json::to_writer(&mut out, &message)
            .map_err(io::Error::from)
            .and_then(|_| writeln!(out))
            .and_then(|_| out.flush());
        if let Err(e) = written {
            log::warn!("Failed to write message to stdout: {}", e);
        }
    }
}

/// Turn one input line into an action
fn parse_line(line: &str) -> Result<Action> {
    match serde_json::from_str::<Inbound>(line)? {
        Inbound::Path(request) => {
            if request.action != "parse" {
                bail!("\"path\" is only valid for parse, got {:?}", request.action);
            }
            let file = std::fs::read(&request.path)
                .with_context(|| format!("Failed to read log file: {:?}", request.path))?;
            Ok(Action::Parse {
                file,
                is_tlog: request.is_tlog,
                is_dji: request.is_dji,
            })
        }
        Inbound::Action(action) => Ok(action),
    }
}

/// Serve actions from stdin until it closes
pub fn run(config: SessionConfig) -> Result<()> {
    let controller = InteractiveController::new(config, StdoutSink)?;
    let (actions, handle) = controller.spawn()?;
    log::info!("Interactive session ready, reading actions from stdin");

    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(action) => {
                if actions.send(action).is_err() {
                    break;
                }
            }
            Err(e) => log::warn!("bad message: {:#}", e),
        }
    }

    drop(actions);
    handle
        .join()
        .map_err(|_| anyhow!("Interactive controller panicked"))?;
    log::info!("Interactive session closed");
    Ok(())
}
