//! Colored diagnostics on stderr.
//!
//! Respects the `NO_COLOR` environment variable and the `--color` flag.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// `error: message`, the prefix in red bold
pub fn error(choice: ColorChoice, message: &str) {
    let mut stderr = StandardStream::stderr(choice);
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(Color::Red)).set_bold(true);
    let _ = stderr.set_color(&spec);
    let _ = write!(stderr, "error:");
    let _ = stderr.reset();
    let _ = writeln!(stderr, " {}", message);
}
