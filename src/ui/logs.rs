use chrono::{DateTime, Local};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tokio::sync::mpsc;

/// Sending half handed to every launched process.
pub type LogSink = mpsc::Sender<LogLine>;

const CHANNEL_CAPACITY: usize = 1024;

pub fn channel() -> (LogSink, mpsc::Receiver<LogLine>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

// ---------------------------------------------------------------------------
// LogLevel — detected from child output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

static LOG_LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(debug|info|warn(?:ing)?|err(?:or)?|fatal|panic)\b"#).unwrap()
});

/// First level keyword in a line of child output, if any.
pub fn detect_log_level(text: &str) -> Option<LogLevel> {
    let word = LOG_LEVEL_RE.find(text)?.as_str().to_lowercase();
    match word.as_str() {
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "err" | "error" | "fatal" | "panic" => Some(LogLevel::Error),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// LogLine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    /// Service name, or `<service>:build` for build output.
    pub source: String,
    pub stream: Stream,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

impl LogLine {
    pub fn new(source: impl Into<String>, stream: Stream, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            timestamp: Local::now(),
            source: source.into(),
            stream,
            level: detect_log_level(&text),
            text,
        }
    }
}

// ---------------------------------------------------------------------------
// LogWriter — prefixes each line with its source, colored on a terminal
// ---------------------------------------------------------------------------

/// Build output shares its service's color.
fn color_key(source: &str) -> &str {
    source.split(':').next().unwrap_or(source)
}

fn paint_source(source: &str, color_idx: usize) -> String {
    match color_idx % 4 {
        0 => source.cyan().to_string(),
        1 => source.magenta().to_string(),
        2 => source.green().to_string(),
        _ => source.blue().to_string(),
    }
}

pub fn format_line(line: &LogLine, width: usize, color_idx: usize, use_color: bool) -> String {
    let time = line.timestamp.format("%H:%M:%S");
    if !use_color {
        let level = line.level.map(|l| format!("{} ", l.as_str())).unwrap_or_default();
        return format!("{} {:>width$} | {}{}", time, line.source, level, line.text);
    }

    let pad = " ".repeat(width.saturating_sub(line.source.len()));
    let text = match (line.level, line.stream) {
        (Some(LogLevel::Error), _) => line.text.red().to_string(),
        (Some(LogLevel::Warn), _) => line.text.yellow().to_string(),
        (Some(LogLevel::Debug), _) => line.text.dimmed().to_string(),
        (_, Stream::Stderr) => line.text.red().to_string(),
        _ => line.text.clone(),
    };
    format!(
        "{} {}{} {} {}",
        time.dimmed(),
        pad,
        paint_source(&line.source, color_idx),
        "|".dimmed(),
        text
    )
}

pub struct LogWriter {
    rx: mpsc::Receiver<LogLine>,
    width: usize,
    use_color: bool,
}

impl LogWriter {
    /// `names` fixes the prefix column width and the color order.
    pub fn new<'a>(rx: mpsc::Receiver<LogLine>, names: impl IntoIterator<Item = &'a str>) -> Self {
        let width = names
            .into_iter()
            .map(|n| n.len() + ":build".len())
            .max()
            .unwrap_or(0);
        Self {
            rx,
            width,
            use_color: std::io::stdout().is_terminal(),
        }
    }

    pub async fn run(mut self) {
        let mut colors: BTreeMap<String, usize> = BTreeMap::new();
        while let Some(line) = self.rx.recv().await {
            let next = colors.len();
            let idx = *colors
                .entry(color_key(&line.source).to_string())
                .or_insert(next);
            println!("{}", format_line(&line, self.width, idx, self.use_color));
        }
    }
}
