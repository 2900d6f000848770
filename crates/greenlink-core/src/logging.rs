//! Per-session transcript files.
//!
//! Every delivered notification and lifecycle transition can be appended to
//! `{log_dir}/{session_id}.log` with a UTC timestamp. The `log` facade is used
//! for diagnostics; the transcript is a separate, append-only record.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only transcript file.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// A handle that writes nowhere.
pub fn disabled() -> LogHandle {
    Arc::new(Mutex::new(None))
}

/// ISO 8601 UTC with milliseconds (e.g. 2026-02-04T10:15:30.123Z).
fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write a timestamped line to the transcript (if present).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let ts = utc_timestamp();
            if let Err(e) = writeln!(file, "[{}] {}: {}", ts, direction, data).and_then(|_| file.flush())
            {
                log::warn!("Failed to write transcript line: {}", e);
            }
        }
    }
}

/// Open (or create) `{log_dir}/{log_id}.log` and return a shared handle.
///
/// With no directory, or if the file cannot be opened, the handle is disabled.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        let path = dir.join(format!("{}.log", log_id));
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("Cannot create transcript dir {}: {}", dir.display(), e);
            return None;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| log::warn!("Cannot open transcript {}: {}", path.display(), e))
            .ok()
    });
    Arc::new(Mutex::new(file))
}
