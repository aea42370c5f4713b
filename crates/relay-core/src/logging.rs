//! Process logging: `tracing` subscriber setup plus the relay's in-memory
//! log buffer served by the status endpoint.

use std::{
    collections::VecDeque,
    fmt,
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use chrono::Utc;
use serde::Serialize;

use crate::{errors::Error, Result};

/// Initialize tracing for the relay.
///
/// Default: info for our crates. Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "info,relay_core=info,relay_bridge=info,relay_status=info,{service_name}=info"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::Config(format!("logging init failed: {e}")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub scope: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, scope: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            level,
            scope: scope.to_string(),
            message: message.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "{} [{}] {}: {}",
            self.timestamp, self.level, self.scope, self.message
        )
    }
}

/// Append-only log sink injected into the engines.
pub trait EventLog: Send + Sync {
    fn append(&self, entry: LogEntry);

    fn info(&self, scope: &str, message: String) {
        self.append(LogEntry::new(LogLevel::Info, scope, message));
    }

    fn warn(&self, scope: &str, message: String) {
        self.append(LogEntry::new(LogLevel::Warn, scope, message));
    }

    fn error(&self, scope: &str, message: String) {
        self.append(LogEntry::new(LogLevel::Error, scope, message));
    }
}

struct Mirror {
    path: PathBuf,
    json: bool,
    file: Option<File>,
}

struct BufferState {
    entries: VecDeque<LogEntry>,
    mirror: Option<Mirror>,
}

/// Bounded in-memory log, mirrored to `tracing` and optionally to a file.
///
/// Appends are serialized behind one mutex so concurrent handler tasks never
/// interleave partial entries.
pub struct LogBuffer {
    state: Mutex<BufferState>,
    capacity: usize,
    closed: AtomicBool,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                entries: VecDeque::new(),
                mirror: None,
            }),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Also append every entry to `path` (plain text, or JSON lines).
    pub fn with_mirror(self, path: impl Into<PathBuf>, json: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.lock().mirror = Some(Mirror {
            path,
            json,
            file: Some(file),
        });
        Ok(self)
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All buffered entries, one per line.
    pub fn render_text(&self) -> String {
        self.lock()
            .entries
            .iter()
            .map(LogEntry::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Flush the mirror and stop accepting entries.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut st = self.lock();
        if let Some(mirror) = st.mirror.as_mut() {
            if let Some(mut file) = mirror.file.take() {
                if let Err(e) = file.flush() {
                    tracing::warn!(path = %mirror.path.display(), error = %e, "log mirror flush failed");
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventLog for LogBuffer {
    fn append(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => tracing::info!(scope = %entry.scope, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(scope = %entry.scope, "{}", entry.message),
            LogLevel::Error => tracing::error!(scope = %entry.scope, "{}", entry.message),
        }

        if self.is_closed() {
            return;
        }

        let mut st = self.lock();
        if let Some(mirror) = st.mirror.as_mut() {
            write_mirror(mirror, &entry);
        }
        while st.entries.len() >= self.capacity {
            st.entries.pop_front();
        }
        st.entries.push_back(entry);
    }
}

fn write_mirror(mirror: &mut Mirror, entry: &LogEntry) {
    let Some(file) = mirror.file.as_mut() else {
        return;
    };
    let line = if mirror.json {
        match serde_json::to_string(entry) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "log entry serialization failed");
                return;
            }
        }
    } else {
        entry.render()
    };
    if let Err(e) = writeln!(file, "{line}") {
        tracing::warn!(path = %mirror.path.display(), error = %e, "log mirror write failed");
    }
}
