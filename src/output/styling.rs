use console::{style, StyledObject};

use crate::monitor::Severity;

/// Styling helpers for terminal output
pub fn bright_yellow(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn bright_blue(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright().blue()
}

pub fn cyan(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl std::fmt::Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

const FILLED: &str = "●";
const HOLLOW: &str = "○";

/// Filled dot for statuses that have a color, hollow for anything unrecognised.
pub fn glyph(status: &str) -> &'static str {
    match status.to_lowercase().as_str() {
        "success" | "failed" | "running" | "pending" | "cancel" | "canceled" | "skipped" => FILLED,
        _ => HOLLOW,
    }
}

pub fn status_glyph(status: &str) -> StyledObject<String> {
    match status.to_lowercase().as_str() {
        "success" => bright_green(FILLED),
        "failed" => bright_red(FILLED),
        "running" => bright_blue(FILLED),
        "pending" => bright_yellow(FILLED),
        "cancel" | "canceled" | "skipped" => dim(FILLED),
        _ => style(HOLLOW.to_string()),
    }
}

pub fn severity_label(severity: Severity) -> StyledObject<String> {
    match severity {
        Severity::Info => cyan("info"),
        Severity::Warning => bright_yellow("warning"),
        Severity::Error => bright_red("error"),
    }
}
