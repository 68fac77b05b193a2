use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

use console::Style;

/// Shown instead of a job log that has no output yet.
pub const EMPTY_LOG: &str = "(empty job log)";

static ESCAPE_REGEX: OnceLock<Regex> = OnceLock::new();

/// CSI sequences (`ESC [ params final`) and the shorter `ESC intermediates final` forms.
fn escape_regex() -> &'static Regex {
    ESCAPE_REGEX.get_or_init(|| {
        Regex::new(r"\x1b\[([0-?]*)[ -/]*([@-~])|\x1b[ -/]*[0-~]").expect("Failed to compile escape regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnsiColor {
    Red,
    Green,
    Yellow,
    Blue,
}

impl AnsiColor {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            31 => Some(Self::Red),
            32 => Some(Self::Green),
            33 => Some(Self::Yellow),
            34 => Some(Self::Blue),
            _ => None,
        }
    }

    pub fn css(self) -> &'static str {
        match self {
            Self::Red => "#f14c4c",
            Self::Green => "#23d18b",
            Self::Yellow => "#f5f543",
            Self::Blue => "#3b8eea",
        }
    }

    pub fn style(self) -> Style {
        match self {
            Self::Red => Style::new().red(),
            Self::Green => Style::new().green(),
            Self::Yellow => Style::new().yellow(),
            Self::Blue => Style::new().blue(),
        }
    }
}

/// A colored byte range of [`AnsiText::plain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorSpan {
    pub color: AnsiColor,
    pub range: Range<usize>,
}

/// Log text with escape sequences removed and colors kept as spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnsiText {
    pub plain: String,
    pub spans: Vec<ColorSpan>,
}

impl AnsiText {
    /// Walks the plain text as consecutive uncolored and colored pieces.
    pub fn segments(&self) -> Vec<(Option<AnsiColor>, &str)> {
        let mut segments = Vec::with_capacity(self.spans.len() * 2 + 1);
        let mut pos = 0;

        for span in &self.spans {
            if span.range.start > pos {
                segments.push((None, &self.plain[pos..span.range.start]));
            }
            segments.push((Some(span.color), &self.plain[span.range.clone()]));
            pos = span.range.end;
        }
        if pos < self.plain.len() {
            segments.push((None, &self.plain[pos..]));
        }

        segments
    }

    fn push(&mut self, text: &str, color: Option<AnsiColor>) {
        if text.is_empty() {
            return;
        }

        let start = self.plain.len();
        self.plain.push_str(text);

        if let Some(color) = color {
            match self.spans.last_mut() {
                Some(last) if last.color == color && last.range.end == start => {
                    last.range.end = self.plain.len();
                }
                _ => self.spans.push(ColorSpan {
                    color,
                    range: start..self.plain.len(),
                }),
            }
        }
    }
}

/// Splits job log output into plain text and color spans.
///
/// Only reset (0) and the red/green/yellow/blue foreground codes (31-34)
/// affect color. Every other escape sequence is dropped from the text.
pub fn parse_ansi(text: &str) -> AnsiText {
    let mut parsed = AnsiText::default();
    let mut color = None;
    let mut last = 0;

    for caps in escape_regex().captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };

        parsed.push(&text[last..whole.start()], color);
        last = whole.end();

        let is_sgr = caps.get(2).is_some_and(|f| f.as_str() == "m");
        if let (true, Some(params)) = (is_sgr, caps.get(1)) {
            color = apply_sgr(params.as_str(), color);
        }
    }

    parsed.push(&text[last..], color);
    parsed
}

fn apply_sgr(params: &str, mut color: Option<AnsiColor>) -> Option<AnsiColor> {
    for param in params.split(';') {
        // ESC[m is a reset too
        let code = if param.is_empty() { Some(0) } else { param.parse::<u8>().ok() };
        match code {
            Some(0) => color = None,
            Some(code) => {
                if let Some(c) = AnsiColor::from_code(code) {
                    color = Some(c);
                }
            }
            None => {}
        }
    }
    color
}

/// Turns a raw job log into something a log view can display.
pub trait LogRenderer: Send + Sync {
    fn render(&self, log: &str) -> String;
}

fn or_placeholder(log: &str) -> &str {
    if log.is_empty() {
        EMPTY_LOG
    } else {
        log
    }
}

/// Escaped markup with `<span>`s for colored runs, for embedding in a `<pre>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl LogRenderer for HtmlRenderer {
    fn render(&self, log: &str) -> String {
        let parsed = parse_ansi(or_placeholder(log));
        let mut html = String::with_capacity(parsed.plain.len());

        for (color, text) in parsed.segments() {
            match color {
                Some(color) => html.push_str(&format!(
                    "<span style=\"color:{}\">{}</span>",
                    color.css(),
                    escape_html(text)
                )),
                None => html.push_str(&escape_html(text)),
            }
        }

        html
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Re-emits only the colors we understand, styled for the current terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalRenderer;

impl LogRenderer for TerminalRenderer {
    fn render(&self, log: &str) -> String {
        let parsed = parse_ansi(or_placeholder(log));

        parsed
            .segments()
            .into_iter()
            .map(|(color, text)| match color {
                Some(color) => color.style().apply_to(text).to_string(),
                None => text.to_string(),
            })
            .collect()
    }
}
