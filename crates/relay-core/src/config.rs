use std::{env, fs, net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

/// Typed configuration for the relay.
#[derive(Clone, Debug)]
pub struct Config {
    // Account bridge
    pub bridge_command: PathBuf,
    pub bridge_args: Vec<String>,

    // Forwarding
    pub allowed_senders: Vec<String>,
    pub destinations: Vec<String>,

    // Admission
    pub enrollment_target: String,
    pub accept_delay: Duration,
    pub enroll_delay: Duration,

    // Session hardening
    pub op_timeout: Duration,
    pub send_interval: Duration,
    pub shutdown_grace: Duration,

    // Status surface + log buffer
    pub status_addr: SocketAddr,
    pub log_capacity: usize,
    pub log_file: Option<PathBuf>,
    pub log_json: bool,
}

impl Config {
    /// Load from the process environment (after an optional `.env`).
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let bridge_command = get("RELAY_BRIDGE_CMD").map(PathBuf::from).ok_or_else(|| {
            Error::Config("RELAY_BRIDGE_CMD environment variable is required".to_string())
        })?;
        let bridge_args = get("RELAY_BRIDGE_ARGS")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let allowed_senders = parse_csv(get("RELAY_ALLOWED_SENDERS"));
        let destinations = parse_csv(get("RELAY_DESTINATIONS"));

        let enrollment_target = get("RELAY_ENROLLMENT_TARGET")
            .map(|s| s.trim().to_string())
            .ok_or_else(|| {
                Error::Config("RELAY_ENROLLMENT_TARGET environment variable is required".to_string())
            })?;

        let millis = |key: &str, default: u64| -> Result<Duration> {
            match get(key) {
                None => Ok(Duration::from_millis(default)),
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| Error::Config(format!("{key} must be a number of milliseconds"))),
            }
        };

        let accept_delay = millis("RELAY_ACCEPT_DELAY_MS", 4_000)?;
        let enroll_delay = millis("RELAY_ENROLL_DELAY_MS", 3_000)?;
        let op_timeout = millis("RELAY_OP_TIMEOUT_MS", 15_000)?;
        let send_interval = millis("RELAY_SEND_INTERVAL_MS", 0)?;
        let shutdown_grace = millis("RELAY_SHUTDOWN_GRACE_MS", 5_000)?;

        let status_addr = get("RELAY_STATUS_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3006".to_string())
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("RELAY_STATUS_ADDR is invalid: {e}")))?;

        let log_capacity = match get("RELAY_LOG_CAPACITY") {
            None => 1000,
            Some(v) => v.trim().parse::<usize>().map_err(|_| {
                Error::Config("RELAY_LOG_CAPACITY must be a number of entries".to_string())
            })?,
        };
        let log_file = get("RELAY_LOG_FILE").map(PathBuf::from);
        let log_json = get("RELAY_LOG_JSON").map(|s| truthy(&s)).unwrap_or(false);

        Ok(Self {
            bridge_command,
            bridge_args,
            allowed_senders,
            destinations,
            enrollment_target,
            accept_delay,
            enroll_delay,
            op_timeout,
            send_interval,
            shutdown_grace,
            status_addr,
            log_capacity,
            log_file,
            log_json,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue; // existing env wins
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(v: &str) -> &str {
    if v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')))
    {
        return &v[1..v.len() - 1];
    }
    v
}

fn truthy(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
