use std::time::Duration;

/// Core error type for the relay.
///
/// Adapter crates map their failures into this type so the engines can log
/// every fault at the unit of work that produced it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("lookup of {name} failed: {reason}")]
    Lookup { name: String, reason: String },

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("send to {destination} failed: {reason}")]
    Send { destination: String, reason: String },

    #[error("admission error: {0}")]
    Admission(String),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: String, after: Duration },

    #[error("bridge error: {0}")]
    Bridge(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
