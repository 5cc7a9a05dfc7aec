//! Terminal UI helpers for consistent colored output.

use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Print a success message with green checkmark.
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a denial (blocked, locked, held elsewhere) with a yellow marker.
pub fn denied(msg: &str) {
    println!("{} {}", "⊘".yellow(), msg);
}

/// Print an info message with blue info icon.
pub fn info(msg: &str) {
    eprintln!("{} {}", "ℹ".blue(), msg);
}

/// Print an error message with red X.
fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a hint/suggestion (dimmed, indented).
fn hint(msg: &str) {
    eprintln!("  {} {}", "→".dimmed(), msg.dimmed());
}

/// Format a value as bold (for keys, tokens, etc.).
pub fn bold(s: &str) -> String {
    s.bold().to_string()
}

/// Render a duration the way operators type it: `5m`, `1h 30m`.
pub fn duration(d: Duration) -> String {
    if d.is_zero() {
        return "none".to_string();
    }
    humantime::format_duration(Duration::from_secs(d.as_secs().max(1))).to_string()
}

/// Run an async operation with a spinner showing the given message.
pub async fn spin<T, F: Future<Output = T>>(msg: &str, fut: F) -> T {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.dim} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(msg.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = fut.await;

    spinner.finish_and_clear();
    result
}

/// Display an error with contextual hints based on the error message.
pub fn print_error(err: &anyhow::Error) {
    let msg = err.to_string();
    error(&msg);

    if let Some(hint_msg) = hint_for(&msg) {
        hint(hint_msg);
    }
}

fn hint_for(msg: &str) -> Option<&'static str> {
    if msg.contains("missing value for field") {
        Some("Set TOLLGATE_REDIS_URL, e.g. redis://127.0.0.1:6379")
    } else if msg.contains("store unavailable") {
        Some("Check that Redis is running and reachable at TOLLGATE_REDIS_URL.")
    } else if msg.contains("invalid redis url") {
        Some("Use the form redis://host:port or rediss://host:port for TLS.")
    } else if msg.contains("idempotency key") {
        Some("Keys must be 1 to 255 bytes.")
    } else if msg.contains("serialization failed") {
        Some("The stored record is not in the expected format; inspect it with redis-cli.")
    } else {
        None
    }
}
