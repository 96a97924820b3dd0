use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

const TICK: Duration = Duration::from_millis(80);

/// Steady-ticking spinner for long operations. Hidden automatically when
/// stderr is not a terminal.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn start(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.yellow} {msg} {elapsed:.dim}")
            .map(|s| s.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_message(message.into());
        bar.enable_steady_tick(TICK);
        Self { bar }
    }

    pub fn succeed(self, message: &str) {
        self.bar.finish_and_clear();
        if std::io::stdout().is_terminal() {
            println!("  {} {}", "\u{2713}".green(), message);
        } else {
            println!("  \u{2713} {}", message);
        }
    }

    pub fn fail(self, message: &str) {
        self.bar.finish_and_clear();
        if std::io::stdout().is_terminal() {
            println!("  {} {}", "\u{2717}".red(), message);
        } else {
            println!("  \u{2717} {}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_lifecycle_does_not_panic() {
        let spinner = Spinner::start("restarting");
        spinner.succeed("done");
        Spinner::start("again").fail("nope");
    }
}
