//! Logging helpers. stdout carries payload bytes, so every diagnostic line
//! goes to stderr.

use std::env;

use chrono::Local;

fn debug_enabled() -> bool {
    env::var("HTCAT_LOG")
        .map(|v| {
            let v = v.to_lowercase();
            v == "debug" || v == "trace" || v == "1"
        })
        .unwrap_or(false)
}

/// Timestamped diagnostic line, printed only when HTCAT_LOG asks for it.
pub fn log_debug(message: &str) {
    if debug_enabled() {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        eprintln!("[{}] {}", timestamp, message);
    }
}

/// Error line for the user. Always printed.
pub fn log_error(message: &str) {
    eprintln!("{}", message);
}
