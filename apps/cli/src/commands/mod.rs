pub mod auth;
pub mod files;
pub mod quota;

use std::io::Write;

use recsync_protocol::TransferProgress;

/// Formats a byte count for humans.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Single-line progress on stderr.
pub fn print_progress(p: TransferProgress) {
    let percent = p
        .percent
        .map(|v| format!("{v:5.1}%"))
        .unwrap_or_else(|| "  ?  ".into());
    let mut err = std::io::stderr().lock();
    let _ = write!(
        err,
        "\r{percent}  {} / {}  {}/s   ",
        human_bytes(p.bytes_transferred),
        human_bytes(p.total_bytes),
        human_bytes(p.bytes_per_second as u64),
    );
    if p.bytes_transferred >= p.total_bytes {
        let _ = writeln!(err);
    }
    let _ = err.flush();
}
