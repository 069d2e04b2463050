use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:3001";
pub const DEFAULT_COUNTRY_CODE: &str = "91";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bridge_url: String,
    pub bridge_token: Option<String>,
    /// Prefix put in front of every recipient number. Not selectable per request.
    pub country_code: String,
    pub upload_dir: PathBuf,
    pub public_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub queue_capacity: usize,
    pub status_poll: Duration,
    /// Upper bound on a single bridge request, including media uploads.
    pub send_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            bridge_token: None,
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            upload_dir: PathBuf::from("uploads"),
            public_dir: PathBuf::from("public"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            queue_capacity: 64,
            status_poll: Duration::from_millis(2000),
            send_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source, falling back to
    /// defaults for anything unset or blank.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let country_code = get("WA_COUNTRY_CODE").unwrap_or(defaults.country_code);
        let country_code = country_code.trim().trim_start_matches('+').to_string();
        if country_code.is_empty() || !country_code.chars().all(|c| c.is_ascii_digit()) {
            bail!("WA_COUNTRY_CODE must contain digits only, got {:?}", country_code);
        }

        let queue_capacity: usize = parse_or(&get, "WA_QUEUE_CAPACITY", defaults.queue_capacity)?;
        if queue_capacity == 0 {
            bail!("WA_QUEUE_CAPACITY must be at least 1");
        }

        let status_poll = millis_or(&get, "WA_STATUS_POLL_MS", defaults.status_poll)?;
        let send_timeout = millis_or(&get, "WA_SEND_TIMEOUT_MS", defaults.send_timeout)?;

        Ok(Self {
            port: parse_or(&get, "WA_GATEWAY_PORT", defaults.port)?,
            bridge_url: get("WA_BRIDGE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.bridge_url),
            bridge_token: get("WA_BRIDGE_TOKEN"),
            country_code,
            upload_dir: get("WA_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            public_dir: get("WA_PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.public_dir),
            max_upload_bytes: parse_or(&get, "WA_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            queue_capacity,
            status_poll,
            send_timeout,
        })
    }
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

/// Reads a positive millisecond count.
fn millis_or<F>(get: &F, key: &str, default: Duration) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let ms: u64 = parse_or(get, key, default.as_millis() as u64)?;
    if ms == 0 {
        bail!("{} must be at least 1", key);
    }
    Ok(Duration::from_millis(ms))
}
