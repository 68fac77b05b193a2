use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::bright_yellow;

/// Spinner on stderr, ticking until finished or dropped.
pub fn create_spinner(message: impl std::fmt::Display) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(bright_yellow(message).to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
