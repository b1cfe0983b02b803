//! Progress bar utilities
//!
//! Progress indicators for archive extraction and shard loading. Every
//! constructor takes an `enabled` flag and hands back a hidden bar when
//! progress is switched off, so callers never branch on it.

use byte_unit::{Byte, UnitType};
use indicatif::{ProgressBar, ProgressStyle};

const BYTES_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})";
const ROWS_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {msg}: {human_pos} rows ({per_sec})";

/// Byte progress over an archive's compressed input
///
/// The length is set once the archive is opened.
pub fn create_archive_progress(message: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template(BYTES_TEMPLATE) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message.to_string());
    pb
}

/// Row counter for a shard being loaded
pub fn create_row_counter(message: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template(ROWS_TEMPLATE) {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    let adjusted = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary);
    format!("{:.2}", adjusted)
}
