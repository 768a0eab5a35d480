//! # Structured log pipeline.
//!
//! Workers ship [`LogEntry`] records upward through their envelope; the
//! supervisor hands every entry (its own included) to a [`LogSink`]. The
//! sink is called concurrently from multiple tasks and must be
//! thread-safe. Sink failures never propagate: logging is best-effort by
//! contract.
//!
//! [`Logger`] is the supervisor's own writer: a system component keyed by
//! the app name, the `"supervisor"` component and a fresh per-run node id.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a [`LogEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Fixed-width tag used by the pretty printer.
    pub fn tag(&self) -> &'static str {
        match self {
            Level::Debug => "D",
            Level::Info => "I",
            Level::Warn => "W",
            Level::Error => "E",
        }
    }
}

/// One structured log record.
///
/// Entries produced by a worker carry the worker's own timestamp; entries
/// produced by the supervisor are stamped at creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    /// Application name.
    pub app: String,
    /// Deployment id, as a string (workers treat it opaquely).
    pub version: String,
    /// Fully-qualified component name, or `"supervisor"`.
    pub component: String,
    /// Id of the node (worker or supervisor instance) that wrote the
    /// entry.
    pub node: String,
    /// Microseconds since the Unix epoch.
    pub time_micros: i64,
    /// Severity.
    pub level: Level,
    /// Source file, when known.
    pub file: String,
    /// Source line, when known.
    pub line: i32,
    /// The message.
    pub msg: String,
    /// Alternating key/value attribute pairs.
    pub attrs: Vec<(String, String)>,
}

/// Destination for log entries. Must be thread-safe.
pub trait LogSink: Send + Sync + 'static {
    /// Consumes one entry. Never fails; a sink that cannot write should
    /// drop the entry.
    fn send(&self, entry: LogEntry);
}

impl<F> LogSink for F
where
    F: Fn(LogEntry) + Send + Sync + 'static,
{
    fn send(&self, entry: LogEntry) {
        self(entry)
    }
}

/// Default sink: pretty-prints entries to stderr.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn send(&self, entry: LogEntry) {
        let when = DateTime::<Utc>::from_timestamp_micros(entry.time_micros)
            .unwrap_or_else(|| DateTime::<Utc>::from(SystemTime::now()));
        let mut line = format!(
            "{} {} {} {} {}",
            entry.level.tag(),
            when.format("%H:%M:%S%.3f"),
            shorten_component(&entry.component),
            entry.node.get(..8).unwrap_or(&entry.node),
            entry.msg,
        );
        for (k, v) in &entry.attrs {
            line.push_str(&format!(" {k}={v:?}"));
        }
        eprintln!("{line}");
    }
}

/// Identity of a [`Logger`].
#[derive(Clone, Debug)]
pub struct LoggerOptions {
    /// Application name stamped on every entry.
    pub app: String,
    /// Component name stamped on every entry.
    pub component: String,
    /// Node id stamped on every entry.
    pub node: String,
    /// Deployment id stamped on every entry.
    pub version: String,
    /// Attributes appended to every entry.
    pub attrs: Vec<(String, String)>,
}

/// The supervisor's structured logger, writing through a [`LogSink`].
#[derive(Clone)]
pub struct Logger {
    opts: LoggerOptions,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(opts: LoggerOptions, sink: Arc<dyn LogSink>) -> Self {
        Self { opts, sink }
    }

    pub fn info(&self, msg: &str, attrs: &[(&str, &str)]) {
        self.log(Level::Info, msg, attrs)
    }

    pub fn warn(&self, msg: &str, attrs: &[(&str, &str)]) {
        self.log(Level::Warn, msg, attrs)
    }

    /// Logs `msg` at Error with the failure rendered as an `err`
    /// attribute.
    pub fn error(&self, msg: &str, err: &dyn std::fmt::Display, attrs: &[(&str, &str)]) {
        let err = err.to_string();
        let mut attrs: Vec<(&str, &str)> = attrs.to_vec();
        attrs.push(("err", err.as_str()));
        self.log(Level::Error, msg, &attrs)
    }

    fn log(&self, level: Level, msg: &str, attrs: &[(&str, &str)]) {
        let mut all: Vec<(String, String)> = self.opts.attrs.clone();
        all.extend(attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self.sink.send(LogEntry {
            app: self.opts.app.clone(),
            version: self.opts.version.clone(),
            component: self.opts.component.clone(),
            node: self.opts.node.clone(),
            time_micros: now_micros(),
            level,
            file: String::new(),
            line: 0,
            msg: msg.to_string(),
            attrs: all,
        });
    }
}

/// Microseconds since the Unix epoch, saturating at 0 for pre-epoch
/// clocks.
pub(crate) fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// The last dotted segment of a fully-qualified component name.
///
/// `"pkg.Cache"` shortens to `"Cache"`; a name without dots is returned
/// unchanged.
pub fn shorten_component(component: &str) -> &str {
    component.rsplit('.').next().unwrap_or(component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn shorten() {
        assert_eq!(shorten_component("pkg.Cache"), "Cache");
        assert_eq!(shorten_component("a.b.c.Frontend"), "Frontend");
        assert_eq!(shorten_component("Standalone"), "Standalone");
        assert_eq!(shorten_component(""), "");
    }

    #[test]
    fn logger_stamps_identity_and_attrs() {
        let seen: Arc<Mutex<Vec<LogEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |entry: LogEntry| seen.lock().push(entry)
        };
        let logger = Logger::new(
            LoggerOptions {
                app: "app".to_string(),
                component: "supervisor".to_string(),
                node: "node-1".to_string(),
                version: "v1".to_string(),
                attrs: vec![("appvisor/system".to_string(), String::new())],
            },
            Arc::new(sink),
        );

        logger.error("spawn failed", &"boom", &[("group", "main")]);

        let entries = seen.lock();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.level, Level::Error);
        assert_eq!(e.component, "supervisor");
        assert_eq!(e.msg, "spawn failed");
        assert!(e.attrs.iter().any(|(k, _)| k == "appvisor/system"));
        assert!(e
            .attrs
            .iter()
            .any(|(k, v)| k == "group" && v == "main"));
        assert!(e.attrs.iter().any(|(k, v)| k == "err" && v == "boom"));
    }
}
