//! Backend selection
//!
//! Maps a [`FormatKind`] to exactly one backend constructor. The choice is
//! made from the caller's tag alone; file content is never inspected and no
//! backend is tried as a fallback for another.

use crate::formats::{Backend, DataflashBackend, ProprietaryBackend, TlogBackend};
use crate::types::{FlightLogError, FormatKind, LogFile, Result};

/// Construct the backend for a tagged log file
///
/// # Arguments
/// * `file` - Log bytes and the format they were tagged with
///
/// # Returns
/// * `Result<Backend>` - An unprocessed backend owning the bytes, or
///   `InvalidInput` for an empty file
pub fn select_backend(file: LogFile) -> Result<Backend> {
    if file.is_empty() {
        return Err(FlightLogError::InvalidInput(format!(
            "Empty {} log file",
            file.kind()
        )));
    }

    let kind = file.kind();
    log::debug!("Selecting {} backend for {} bytes", kind, file.len());

    let data = file.into_bytes();
    Ok(match kind {
        FormatKind::Tlog => Backend::Tlog(TlogBackend::new(data)),
        FormatKind::Proprietary => Backend::Proprietary(ProprietaryBackend::new(data)),
        FormatKind::Dataflash => Backend::Dataflash(DataflashBackend::new(data)),
    })
}
