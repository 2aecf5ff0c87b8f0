use std::collections::HashMap;
use std::env;

use thiserror::Error;

use progress_core::model::UserId;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerConfigError {
    #[error("PROGRESS_TOKENS entry `{0}` is not of the form <token>:<user id>")]
    InvalidToken(String),
}

/// HTTP server settings.
///
/// `PROGRESS_BIND` (default `127.0.0.1:8080`) and `PROGRESS_TOKENS`, a comma
/// separated list of `<token>:<user id>` pairs accepted as bearer tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub tokens: HashMap<String, UserId>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            tokens: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// # Errors
    ///
    /// Returns `ServerConfigError` for malformed token entries.
    pub fn from_env() -> Result<Self, ServerConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// # Errors
    ///
    /// Returns `ServerConfigError` for malformed token entries.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerConfigError> {
        let bind = lookup("PROGRESS_BIND")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let tokens = match lookup("PROGRESS_TOKENS") {
            Some(raw) => parse_tokens(&raw)?,
            None => HashMap::new(),
        };
        Ok(Self { bind, tokens })
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }
}

fn parse_tokens(raw: &str) -> Result<HashMap<String, UserId>, ServerConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, user) = entry
                .split_once(':')
                .ok_or_else(|| ServerConfigError::InvalidToken(entry.to_string()))?;
            let user_id = user
                .trim()
                .parse::<UserId>()
                .map_err(|_| ServerConfigError::InvalidToken(entry.to_string()))?;
            let token = token.trim();
            if token.is_empty() {
                return Err(ServerConfigError::InvalidToken(entry.to_string()));
            }
            Ok((token.to_string(), user_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_map_to_users() {
        let config = ServerConfig::from_lookup(|var| match var {
            "PROGRESS_TOKENS" => Some("alice-token:1, bob-token:2".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.tokens.get("alice-token"), Some(&UserId::new(1)));
        assert_eq!(config.tokens.get("bob-token"), Some(&UserId::new(2)));
    }

    #[test]
    fn malformed_entries_are_rejected() {
        for raw in ["no-user", ":3", "tok:abc"] {
            let result = ServerConfig::from_lookup(|var| {
                (var == "PROGRESS_TOKENS").then(|| raw.to_string())
            });
            assert!(result.is_err(), "{raw} should be rejected");
        }
    }
}
