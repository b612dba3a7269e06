//! Human readable text for status and details lines.

pub(crate) fn plural<'a>(count: u64, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

/// Formats a duration in seconds as "5 seconds", "3 minutes", "1 hour, 20 minutes" or "6 hours".
pub fn format_time(seconds: i64) -> String {
    let seconds = seconds.max(0) as u64;

    if seconds < 60 {
        return format!("{} {}", seconds, plural(seconds, "second", "seconds"));
    }

    if seconds < 60 * 60 {
        let minutes = seconds / 60;
        return format!("{} {}", minutes, plural(minutes, "minute", "minutes"));
    }

    let hours = seconds / (60 * 60);

    if seconds < 60 * 60 * 4 {
        let minutes = (seconds - hours * 60 * 60) / 60;
        return format!(
            "{} {}, {} {}",
            hours,
            plural(hours, "hour", "hours"),
            minutes,
            plural(minutes, "minute", "minutes")
        );
    }

    format!("{} {}", hours, plural(hours, "hour", "hours"))
}

/// Formats a byte count with decimal (SI) units: "1 byte", "532 bytes", "1.5 kB", "12.0 MB".
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["kB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 1000 {
        return format!("{} {}", bytes, plural(bytes, "byte", "bytes"));
    }

    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// "x / y" counter used while no reliable rate is known.
pub fn format_count(done: u64, total: u64) -> String {
    format!("{} / {}", done, total)
}

/// "3 / 10 — 2 minutes left (4 files/sec)"
pub fn format_files_left(current: u64, total: u64, remaining_secs: i64, files_per_sec: f64) -> String {
    let rate = (files_per_sec + 0.5) as u64;
    format!(
        "{} / {} \u{2014} {} left ({} {}/sec)",
        current,
        total,
        format_time(remaining_secs),
        rate,
        plural(rate, "file", "files")
    )
}

/// "2.0 MB / 4.0 MB — 2 seconds left (1.0 MB/sec)"
pub fn format_bytes_left(done: u64, total: u64, remaining_secs: i64, bytes_per_sec: f64) -> String {
    format!(
        "{} / {} \u{2014} {} left ({}/sec)",
        format_size(done),
        format_size(total),
        format_time(remaining_secs),
        format_size(bytes_per_sec as u64)
    )
}
