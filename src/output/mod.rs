mod log_view;
mod progress;
mod styling;
mod tables;
pub mod tree;

pub use log_view::TerminalLogView;
pub use progress::create_spinner;
pub use styling::{bright_green, bright_red, dim, magenta_bold};
pub use tree::{render_tree, PipelineTree};

use crate::monitor::Notification;

use styling::{severity_label, status_glyph};

/// Prints the pipewatch banner to stderr.
///
/// Displays the tool name, version, and description at the start of execution.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🔭 pipewatch"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("GitLab pipeline monitor")
    );
}

pub fn print_notification(notification: &Notification) {
    eprintln!(
        "{} {} {}",
        status_glyph(&notification.current),
        severity_label(notification.severity),
        notification
    );
}
