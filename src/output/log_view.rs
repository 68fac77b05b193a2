use indicatif::ProgressBar;
use parking_lot::Mutex;
use std::io::Write;

use crate::session::LogView;

use super::styling::{bright, bright_red, dim};

/// Log view that streams into the terminal.
///
/// Logs only grow while a job runs, so when the new render extends what was
/// already printed only the tail is written. Anything else reprints in full.
pub struct TerminalLogView {
    printed: Mutex<String>,
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalLogView {
    /// Shows `spinner` until the first log or message arrives.
    pub fn with_spinner(spinner: ProgressBar) -> Self {
        Self {
            printed: Mutex::new(String::new()),
            spinner: Mutex::new(Some(spinner)),
        }
    }

    fn clear_spinner(&self) {
        if let Some(spinner) = self.spinner.lock().take() {
            spinner.finish_and_clear();
        }
    }
}

/// The part of `current` not yet printed, or `None` if it does not extend `previous`.
pub fn unprinted_tail<'a>(previous: &str, current: &'a str) -> Option<&'a str> {
    current.strip_prefix(previous)
}

impl LogView for TerminalLogView {
    fn set_title(&self, title: &str) {
        eprintln!("{}", bright(title).underlined());
    }

    fn show_log(&self, rendered: &str) {
        self.clear_spinner();

        let mut printed = self.printed.lock();
        match unprinted_tail(&printed, rendered) {
            Some(tail) => print!("{tail}"),
            None => {
                if !printed.is_empty() {
                    println!("\n{}", dim("── log restarted ──"));
                }
                print!("{rendered}");
            }
        }
        let _ = std::io::stdout().flush();
        *printed = rendered.to_string();
    }

    fn show_message(&self, message: &str) {
        self.clear_spinner();

        if message.starts_with("Failed") {
            eprintln!("{}", bright_red(message));
        } else {
            eprintln!("{}", dim(message));
        }
    }

    fn focus(&self) {
        eprintln!("{}", dim("(log already open)"));
    }
}
