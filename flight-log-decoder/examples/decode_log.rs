//! Standalone flight log inspection tool
//!
//! Decodes a log with every message type enabled and prints a summary of
//! what it found: metadata, decoded types with their row counts and fields,
//! and embedded files.
//!
//! Usage:
//!   decode_log <log_file> [tlog|dataflash|dji] [--limit <count>]
//!
//! Example:
//!   decode_log 00000042.BIN dataflash --limit 20

use flight_log_decoder::{
    BackendMessage, FormatKind, LogFile, MessageTypeFilter, ParserSession, TIME_FIELD,
};
use std::env;
use std::path::PathBuf;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <log_file> [tlog|dataflash|dji] [--limit <count>]", args[0]);
        std::process::exit(1);
    }

    let path = PathBuf::from(&args[1]);
    let mut kind = FormatKind::Dataflash;
    let mut limit = usize::MAX;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--limit" if i + 1 < args.len() => {
                limit = args[i + 1].parse().unwrap_or(usize::MAX);
                i += 2;
            }
            tag => {
                kind = match tag.parse() {
                    Ok(kind) => kind,
                    Err(e) => {
                        eprintln!("{}", e);
                        std::process::exit(1);
                    }
                };
                i += 1;
            }
        }
    }

    let file = match LogFile::read(&path, kind) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error reading {:?}: {}", path, e);
            std::process::exit(1);
        }
    };

    // Empty filter: decode everything up front
    let mut session = ParserSession::new(MessageTypeFilter::default());
    let mut emitted: Vec<BackendMessage> = Vec::new();
    if let Err(e) = session.parse(file, &mut emitted) {
        eprintln!("Error decoding {:?}: {}", path, e);
        std::process::exit(1);
    }

    let Some(surface) = session.surface() else {
        eprintln!("Parser finished without a result");
        std::process::exit(1);
    };

    println!("=== METADATA ===");
    for (key, value) in &surface.metadata {
        println!("  {}: {}", key, value);
    }

    println!("\n=== AVAILABLE MESSAGES ({}) ===", surface.available_messages.len());
    println!("  {}", surface.available_messages.join(", "));

    let messages = surface
        .messages
        .as_ref()
        .or(surface.messages_list.as_ref())
        .cloned()
        .unwrap_or_default();

    println!("\n=== DECODED MESSAGES ({}) ===", messages.len());
    for (name, message) in messages.iter().take(limit) {
        let span = message.field(TIME_FIELD).and_then(|time| {
            let first = time.value_at(0)?;
            let last = time.value_at(time.len()? - 1)?;
            Some(format!("{:.0}..{:.0} ms", first, last))
        });
        println!(
            "  {:<20} {:>8} rows  {:>3} fields  {}",
            name,
            message.len(),
            message.field_count(),
            span.unwrap_or_default()
        );
    }

    if !surface.files.is_empty() {
        println!("\n=== EMBEDDED FILES ({}) ===", surface.files.len());
        for file in &surface.files {
            println!("  {} ({}, {} bytes)", file.name, file.mime, file.data.len());
        }
    }

    let progress_updates = emitted
        .iter()
        .filter(|m| matches!(m, BackendMessage::Progress { .. }))
        .count();
    println!("\n{} messages emitted ({} progress updates)", emitted.len(), progress_updates);
}
