//! Context-aware structured logging.
//!
//! This is the audit logger consumed by the session layer and the HTTP
//! boundary: leveled entries, a per-logger bound context composed with
//! [`Logger::child`], ambient request correlation via
//! [`Logger::for_request`], and wall-time measurement via
//! [`Logger::start_timer`]. A log call never panics and never propagates a
//! sink failure into the operation being logged.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::context;

/// Severity, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }

    pub fn parse(value: &str) -> Option<LogLevel> {
        match value.to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "fatal" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

/// Output rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Terminal color handling for the pretty format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    Always,
    Auto,
    Never,
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub colors: ColorChoice,
    pub format: LogFormat,
    /// Whether to walk an error's `source()` chain at all
    pub include_error_chain: bool,
    pub include_timestamp: bool,
    pub level: LogLevel,
    /// Cap on rendered causes, so one deeply nested error cannot flood a log
    pub max_cause_depth: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            colors: ColorChoice::Auto,
            format: LogFormat::Pretty,
            include_error_chain: true,
            include_timestamp: true,
            level: LogLevel::Info,
            max_cause_depth: 10,
        }
    }
}

/// Rendered error details carried on a log entry.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cause_chain: Vec<String>,
    pub message: String,
}

/// One emitted log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: String,
}

/// Where rendered entries go. The seam exists so tests can capture entries
/// without touching process streams.
pub trait LogSink: Send + Sync {
    fn write(&self, rendered: &str, entry: &LogEntry);
}

/// Default sink: info and below to stdout, warn and above to stderr.
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&self, rendered: &str, entry: &LogEntry) {
        // A failed stream write must never surface into the logged operation
        let result = if entry.level >= LogLevel::Warn {
            writeln!(std::io::stderr(), "{rendered}")
        } else {
            writeln!(std::io::stdout(), "{rendered}")
        };
        let _ = result;
    }
}

/// Collects entries in memory for assertions in tests.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn write(&self, _rendered: &str, entry: &LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.clone());
        }
    }
}

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_DIM: &str = "\x1b[2m";

fn level_color(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "\x1b[34m", // blue
        LogLevel::Info => "\x1b[32m",  // green
        LogLevel::Warn => "\x1b[33m",  // yellow
        LogLevel::Error => "\x1b[31m", // red
        LogLevel::Fatal => "\x1b[35m", // magenta
    }
}

#[derive(Clone)]
pub struct Logger {
    config: Arc<LoggerConfig>,
    context: BTreeMap<String, Value>,
    sink: Arc<dyn LogSink>,
    use_colors: bool,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_sink(config, Arc::new(StdoutSink))
    }

    pub fn with_sink(config: LoggerConfig, sink: Arc<dyn LogSink>) -> Self {
        let use_colors = match config.colors {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => std::io::stdout().is_terminal(),
        };
        Self {
            config: Arc::new(config),
            context: BTreeMap::new(),
            sink,
            use_colors,
        }
    }

    /// A new logger with `fields` merged over this logger's bound context.
    /// Parent fields are preserved unless the child overrides the key.
    pub fn child<I>(&self, fields: I) -> Logger
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut context = self.context.clone();
        context.extend(fields);
        Logger {
            config: Arc::clone(&self.config),
            context,
            sink: Arc::clone(&self.sink),
            use_colors: self.use_colors,
        }
    }

    /// A child carrying the ambient request context (request id, user, path),
    /// if one is active. This is the correlation boundary: no log call takes
    /// a context parameter.
    pub fn for_request(&self) -> Logger {
        match context::current() {
            Some(ctx) => self.child(ctx.as_log_fields()),
            None => self.clone(),
        }
    }

    pub fn debug(&self, message: &str, metadata: Option<BTreeMap<String, Value>>) {
        self.emit(LogLevel::Debug, message, None, metadata);
    }

    pub fn info(&self, message: &str, metadata: Option<BTreeMap<String, Value>>) {
        self.emit(LogLevel::Info, message, None, metadata);
    }

    pub fn warn(&self, message: &str, metadata: Option<BTreeMap<String, Value>>) {
        self.emit(LogLevel::Warn, message, None, metadata);
    }

    pub fn error(
        &self,
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
        metadata: Option<BTreeMap<String, Value>>,
    ) {
        self.emit(LogLevel::Error, message, error, metadata);
    }

    pub fn fatal(
        &self,
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
        metadata: Option<BTreeMap<String, Value>>,
    ) {
        self.emit(LogLevel::Fatal, message, error, metadata);
    }

    /// Start measuring wall time; `Timer::end` emits an info entry with the
    /// elapsed duration in milliseconds.
    pub fn start_timer(&self) -> Timer {
        Timer {
            logger: self.clone(),
            start: Instant::now(),
        }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.config.level
    }

    fn emit(
        &self,
        level: LogLevel,
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
        metadata: Option<BTreeMap<String, Value>>,
    ) {
        // Suppressed levels pay no formatting cost
        if !self.enabled(level) {
            return;
        }

        let entry = LogEntry {
            context: self.context.clone(),
            error: error.map(|e| self.format_error(e)),
            level,
            message: message.to_string(),
            metadata: metadata.unwrap_or_default(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        let rendered = match self.config.format {
            LogFormat::Json => {
                serde_json::to_string(&entry).unwrap_or_else(|_| entry.message.clone())
            }
            LogFormat::Pretty => self.render_pretty(&entry),
        };

        self.sink.write(&rendered, &entry);
    }

    fn format_error(&self, error: &(dyn StdError + 'static)) -> ErrorDetails {
        let mut cause_chain = Vec::new();
        if self.config.include_error_chain {
            let mut source = error.source();
            while let Some(cause) = source {
                if cause_chain.len() >= self.config.max_cause_depth {
                    cause_chain.push("...".to_string());
                    break;
                }
                cause_chain.push(cause.to_string());
                source = cause.source();
            }
        }
        ErrorDetails {
            cause_chain,
            message: error.to_string(),
        }
    }

    fn render_pretty(&self, entry: &LogEntry) -> String {
        let mut parts: Vec<String> = Vec::new();

        if self.config.include_timestamp {
            if self.use_colors {
                parts.push(format!("\x1b[36m[{}]{COLOR_RESET}", entry.timestamp));
            } else {
                parts.push(format!("[{}]", entry.timestamp));
            }
        }

        let level_text = entry.level.as_str().to_uppercase();
        if self.use_colors {
            parts.push(format!(
                "{}{:<5}{COLOR_RESET}",
                level_color(entry.level),
                level_text
            ));
        } else {
            parts.push(format!("{level_text:<5}"));
        }

        parts.push(entry.message.clone());

        for fields in [&entry.context, &entry.metadata] {
            if !fields.is_empty() {
                let rendered = fields
                    .iter()
                    .map(|(k, v)| match v {
                        Value::String(s) => format!("{k}={s}"),
                        other => format!("{k}={other}"),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                if self.use_colors {
                    parts.push(format!("\x1b[90m{rendered}{COLOR_RESET}"));
                } else {
                    parts.push(rendered);
                }
            }
        }

        if let Some(error) = &entry.error {
            parts.push(format!("error={}", error.message));
            if !error.cause_chain.is_empty() {
                let chain = error.cause_chain.join(" <- ");
                if self.use_colors {
                    parts.push(format!("{COLOR_DIM}caused_by={chain}{COLOR_RESET}"));
                } else {
                    parts.push(format!("caused_by={chain}"));
                }
            }
        }

        parts.join(" ")
    }
}

/// Wall-time measurement handle; see [`Logger::start_timer`].
pub struct Timer {
    logger: Logger,
    start: Instant,
}

impl Timer {
    pub fn end(self, message: &str, metadata: Option<BTreeMap<String, Value>>) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        let mut metadata = metadata.unwrap_or_default();
        metadata.insert("duration_ms".to_string(), Value::from(duration_ms));
        self.logger.info(message, Some(metadata));
    }
}

/// Build a metadata/context map from literal pairs.
pub fn fields<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
