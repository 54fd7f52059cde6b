//! Terminal output helpers.

pub mod progress;
pub mod table;

use owo_colors::OwoColorize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

static COLORS: OnceLock<bool> = OnceLock::new();
static QUIET: AtomicBool = AtomicBool::new(false);

/// Configure output once at startup. `force_ansi` overrides detection.
pub fn init(force_ansi: Option<bool>, quiet: bool) {
    let enabled = force_ansi.unwrap_or_else(|| {
        std::env::var_os("NO_COLOR").is_none()
            && std::io::IsTerminal::is_terminal(&std::io::stdout())
    });
    let _ = COLORS.set(enabled);
    QUIET.store(quiet, Ordering::Relaxed);
}

/// Whether ANSI colors are written.
pub fn colors_enabled() -> bool {
    *COLORS.get().unwrap_or(&false)
}

/// Whether informational output is suppressed.
pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Section header.
pub fn header(text: &str) {
    if is_quiet() {
        return;
    }
    if colors_enabled() {
        println!("{}", text.cyan().bold());
    } else {
        println!("{text}");
    }
}

/// Informational line.
pub fn info(text: &str) {
    if is_quiet() {
        return;
    }
    if colors_enabled() {
        println!("{} {text}", "info".blue().bold());
    } else {
        println!("info {text}");
    }
}

/// Success line.
pub fn success(text: &str) {
    if is_quiet() {
        return;
    }
    if colors_enabled() {
        println!("{} {}", "\u{2714}".green().bold(), text.green());
    } else {
        println!("[OK] {text}");
    }
}

/// Warning line on stderr.
pub fn warning(text: &str) {
    if colors_enabled() {
        eprintln!("{} {}", "warning:".yellow().bold(), text.yellow());
    } else {
        eprintln!("warning: {text}");
    }
}

/// Error line on stderr; never suppressed.
pub fn error(text: &str) {
    if colors_enabled() {
        eprintln!("{} {text}", "error:".red().bold());
    } else {
        eprintln!("error: {text}");
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(30 * 1024 * 1024), "30.0 MB");
    }
}
