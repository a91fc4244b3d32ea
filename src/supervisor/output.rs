//! Backend console forwarding.
//!
//! Chunks arrive as the OS pipe hands them over, so one chunk may hold several
//! lines or a partial one. Each chunk is forwarded as a unit.

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl StreamSource {
    pub fn label(&self) -> &'static str {
        match self {
            StreamSource::Stdout => "stdout",
            StreamSource::Stderr => "stderr",
        }
    }
}

/// One decoded chunk of backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub source: StreamSource,
    pub text: String,
}

impl OutputChunk {
    /// Decode raw bytes lossily and trim trailing whitespace.
    /// A whitespace-only chunk is kept and forwards as an empty line.
    pub fn decode(source: StreamSource, bytes: &[u8]) -> Self {
        Self {
            source,
            text: String::from_utf8_lossy(bytes).trim_end().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

/// Writes backend output to the operator through `tracing` (target `backend`).
pub struct OutputForwarder {
    pattern: Option<Regex>,
}

impl OutputForwarder {
    pub fn new(log_pattern: Option<&str>) -> Self {
        let pattern = log_pattern.and_then(|pat| match Regex::new(pat) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Invalid log_pattern '{}': {}, classifying by stream only", pat, e);
                None
            }
        });
        Self { pattern }
    }

    /// stderr lines default to at least Warn.
    pub fn level_of(&self, chunk: &OutputChunk) -> LogLevel {
        let level = parse_log_level(&chunk.text, self.pattern.as_ref());
        match (chunk.source, level) {
            (StreamSource::Stderr, None) => LogLevel::Warn,
            (_, Some(level)) => level,
            (StreamSource::Stdout, None) => LogLevel::Info,
        }
    }

    pub fn forward(&self, chunk: &OutputChunk) {
        let stream = chunk.source.label();
        match self.level_of(chunk) {
            LogLevel::Debug => tracing::debug!(target: "backend", stream, "{}", chunk.text),
            LogLevel::Info => tracing::info!(target: "backend", stream, "{}", chunk.text),
            LogLevel::Warn => tracing::warn!(target: "backend", stream, "{}", chunk.text),
            LogLevel::Error => tracing::error!(target: "backend", stream, "{}", chunk.text),
        }
    }
}

/// Parse the log level from the first line of a chunk using the `level` capture group.
fn parse_log_level(text: &str, pattern: Option<&Regex>) -> Option<LogLevel> {
    let re = pattern?;
    let first = text.lines().next()?;
    let level = re.captures(first)?.name("level")?;
    Some(match level.as_str().to_uppercase().as_str() {
        "ERROR" | "FATAL" | "CRITICAL" => LogLevel::Error,
        "WARN" | "WARNING" => LogLevel::Warn,
        "DEBUG" | "TRACE" => LogLevel::Debug,
        _ => LogLevel::Info,
    })
}
