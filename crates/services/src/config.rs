use std::env;
use std::time::Duration;

use crate::debouncer::{DEFAULT_MAX_WAIT, DEFAULT_WINDOW};
use crate::error::ConfigError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side sync settings.
///
/// | variable                         | default |
/// |----------------------------------|---------|
/// | `PROGRESS_API_URL`               | none (local backend) |
/// | `PROGRESS_API_TOKEN`             | none (sync disabled for remote) |
/// | `PROGRESS_DEBOUNCE_MS`           | 2000    |
/// | `PROGRESS_DEBOUNCE_MAX_WAIT_MS`  | 10000   |
/// | `PROGRESS_REQUEST_TIMEOUT_SECS`  | 10      |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub debounce_window: Duration,
    pub debounce_max_wait: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token: None,
            debounce_window: DEFAULT_WINDOW,
            debounce_max_wait: DEFAULT_MAX_WAIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build from any variable lookup; blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let debounce_window = match get("PROGRESS_DEBOUNCE_MS") {
            Some(raw) => Duration::from_millis(parse_u64("PROGRESS_DEBOUNCE_MS", &raw)?),
            None => defaults.debounce_window,
        };
        let debounce_max_wait = match get("PROGRESS_DEBOUNCE_MAX_WAIT_MS") {
            Some(raw) => {
                Duration::from_millis(parse_u64("PROGRESS_DEBOUNCE_MAX_WAIT_MS", &raw)?)
            }
            None => defaults.debounce_max_wait,
        };
        let request_timeout = match get("PROGRESS_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_u64("PROGRESS_REQUEST_TIMEOUT_SECS", &raw)?),
            None => defaults.request_timeout,
        };

        Ok(Self {
            api_url: get("PROGRESS_API_URL"),
            token: get("PROGRESS_API_TOKEN"),
            debounce_window,
            debounce_max_wait,
            request_timeout,
        })
    }
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: raw.to_string(),
    })
}
