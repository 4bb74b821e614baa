//! Human-readable playback positions and sizes
//!
//! Used by the CLI and log lines so session positions read the same way
//! everywhere.

/// Sessions at least this long (seconds) are shown as `H:MM:SS`
const HOURS_FORMAT_MIN: f64 = 3600.0;

/// Format a playback position relative to the session length.
///
/// The format is chosen by `typical_max` so a column of positions for one
/// session lines up:
/// - `M:SS.s` when the session is shorter than an hour
/// - `H:MM:SS` otherwise
///
/// # Examples
///
/// ```
/// use tkr_common::human_time::format_position;
///
/// assert_eq!(format_position(75.25, 600.0), "1:15.2");
/// assert_eq!(format_position(3725.0, 7200.0), "1:02:05");
/// assert_eq!(format_position(-2.0, 600.0), "-0:02.0");
/// ```
pub fn format_position(seconds: f64, typical_max: f64) -> String {
    if !seconds.is_finite() {
        return "--".to_string();
    }

    let is_negative = seconds < 0.0;
    let abs_seconds = seconds.abs();

    let formatted = if typical_max < HOURS_FORMAT_MIN {
        let minutes = (abs_seconds / 60.0).floor();
        let secs = abs_seconds - minutes * 60.0;
        // Truncate to tenths so 59.96 never renders as "60.0"
        let tenths = (secs * 10.0).floor() / 10.0;
        format!("{}:{:04.1}", minutes as u64, tenths)
    } else {
        let whole = abs_seconds.floor() as u64;
        format!("{}:{:02}:{:02}", whole / 3600, (whole % 3600) / 60, whole % 60)
    };

    if is_negative {
        format!("-{}", formatted)
    } else {
        formatted
    }
}

/// Format an optional position, `"--"` when unknown
pub fn format_position_opt(seconds: Option<f64>, typical_max: f64) -> String {
    match seconds {
        Some(seconds) => format_position(seconds, typical_max),
        None => "--".to_string(),
    }
}

/// Format a byte count with binary units (B, KiB, MiB, GiB)
///
/// # Examples
///
/// ```
/// use tkr_common::human_time::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(100 * 1024 * 1024), "100.0 MiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
