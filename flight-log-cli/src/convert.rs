//! Batch conversion of a DataFlash log into a JSON file

use anyhow::{bail, Context, Result};
use flight_log_decoder::{
    BackendMessage, ExportPayload, FileSink, FormatKind, LogFile, MessageSink, MessageTypeFilter,
    ParserSession,
};
use std::path::{Path, PathBuf};

/// Logs decode progress and counts decoded message types
#[derive(Default)]
struct ProgressLog {
    batches: usize,
}

impl MessageSink for ProgressLog {
    fn post(&mut self, message: BackendMessage) {
        match message {
            BackendMessage::Progress { percentage } => log::debug!("Decoding... {}%", percentage),
            BackendMessage::Batch { message_type, message_list } => {
                self.batches += 1;
                log::debug!("Decoded {} ({} rows)", message_type, message_list.len());
            }
            _ => {}
        }
    }
}

/// Default output path: `<input-stem>_processed.json` in the working directory
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    PathBuf::from(format!("{}_processed.json", stem))
}

/// Check that `input` exists and carries a `.bin` extension (any case)
pub fn validate_input(input: &Path) -> Result<()> {
    if !input.exists() {
        bail!("Input file does not exist: {:?}", input);
    }

    let is_bin = input
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"));
    if !is_bin {
        bail!("Input file must be a .bin DataFlash log: {:?}", input);
    }
    Ok(())
}

/// Decode `input` with the built-in message filter and write the results
///
/// # Arguments
/// * `input` - DataFlash log to decode
/// * `output` - Destination file, or None for the default path
///
/// # Returns
/// * `Result<PathBuf>` - The path that was written
pub fn run(input: Option<&Path>, output: Option<&Path>) -> Result<PathBuf> {
    let Some(input) = input else {
        bail!("Missing input file. Usage: flight-log-cli run <input.bin> [output.json]");
    };
    validate_input(input)?;

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input));

    let file = LogFile::read(input, FormatKind::Dataflash)
        .with_context(|| format!("Failed to read log file: {:?}", input))?;

    let mut session = ParserSession::new(MessageTypeFilter::builtin());
    let mut progress = ProgressLog::default();
    session
        .parse(file, &mut progress)
        .with_context(|| format!("Failed to decode log file: {:?}", input))?;

    let surface = session
        .surface()
        .context("Parser finished without a result")?;
    let payload = ExportPayload::from_surface(&surface);

    log::info!(
        "Decoded {} message types ({} available in log)",
        progress.batches,
        payload.available_messages.len()
    );

    FileSink::new(&output)
        .write(&payload)
        .with_context(|| format!("Failed to write results: {:?}", output))?;

    Ok(output)
}
