//! Terminal status lines and spinners. Everything goes to stderr so stdout
//! stays machine-readable (`--json`).

use std::io::Write;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

/// Print a right-aligned status line: `     Solving environment for install`
///
/// The `label` is padded to 12 characters and printed in bold green.
pub fn status(label: &str, message: &str) {
    emit(Style::new().green().bold(), label, message);
}

/// Like [`status`] but bold cyan, for informational lines.
pub fn status_info(label: &str, message: &str) {
    emit(Style::new().cyan().bold(), label, message);
}

/// Like [`status`] but bold yellow.
pub fn status_warn(label: &str, message: &str) {
    emit(Style::new().yellow().bold(), label, message);
}

fn emit(style: Style, label: &str, message: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{:>12} {message}", style.apply_to(label));
}

/// Animated spinner for indeterminate work such as loading channels.
///
/// Hidden when stderr is not a terminal so piped output stays clean.
pub fn spinner(message: &str) -> ProgressBar {
    if !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}
