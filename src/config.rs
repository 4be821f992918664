//! Server configuration from the environment

use crate::runtime::RuntimeConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;

/// Startup configuration, read once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable values fall back
    /// to their defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("PROCUREMENT_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home)
                    .join(".procurement-assistant")
                    .join("assistant.db")
            },
            PathBuf::from,
        );

        let defaults = RuntimeConfig::default();
        let timeout_secs = parsed(
            &lookup,
            "PROCUREMENT_GENERATION_TIMEOUT_SECS",
            defaults.generation_timeout.as_secs(),
        );

        Self {
            db_path,
            port: parsed(&lookup, "PROCUREMENT_PORT", DEFAULT_PORT),
            runtime: RuntimeConfig {
                max_tool_rounds: parsed(
                    &lookup,
                    "PROCUREMENT_MAX_TOOL_ROUNDS",
                    defaults.max_tool_rounds,
                ),
                generation_timeout: Duration::from_secs(timeout_secs.max(1)),
                history_limit: parsed(
                    &lookup,
                    "PROCUREMENT_HISTORY_LIMIT",
                    defaults.history_limit,
                ),
            },
        }
    }
}

fn parsed<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
            default
        }),
    }
}
