//! Terminal and environment detection.

use std::io::IsTerminal;

#[must_use]
pub fn stdin_is_tty() -> bool {
    std::io::stdin().is_terminal()
}

#[must_use]
pub fn stdout_is_tty() -> bool {
    std::io::stdout().is_terminal()
}

/// Whether colored output should be used.
///
/// Honors the `--no-color` flag, `NO_COLOR`, and `TERM=dumb`, and only colors a TTY.
#[must_use]
pub fn should_use_color(no_color_flag: bool) -> bool {
    if no_color_flag || std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var("TERM").is_ok_and(|t| t == "dumb") {
        return false;
    }
    stdout_is_tty()
}
