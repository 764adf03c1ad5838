//! Table and value formatting shared by the commands.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};

use mirrorfs_core::{FileFlags, FileRecord, UNKNOWN_LENGTH};

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Human-readable byte count, `?` when unknown.
pub fn format_size(length: i64) -> String {
    if length == UNKNOWN_LENGTH {
        return "?".to_string();
    }
    let bytes = length.max(0) as u64;
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

pub fn format_entry_type(record: &FileRecord) -> &'static str {
    if record.flags.contains(FileFlags::SYMLINK) {
        "symlink"
    } else if record.is_directory() {
        "directory"
    } else if record.flags.contains(FileFlags::SPECIAL) {
        "special"
    } else {
        "file"
    }
}

/// Flag names joined with `|`, `-` when none are set.
pub fn format_flags(flags: FileFlags) -> String {
    let names: Vec<&str> = flags.iter_names().map(|(name, _)| name).collect();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join("|")
    }
}

/// Milliseconds since the epoch, as seconds with millisecond precision.
pub fn format_timestamp(millis: i64) -> String {
    format!("{}.{:03}", millis.div_euclid(1000), millis.rem_euclid(1000))
}
