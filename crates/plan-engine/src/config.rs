//! `EngineConfig`: every environment-sourced knob the engine reads, parsed
//! once at startup (spec §6, "Environment (engine-relevant)").
//!
//! There is no schema validation crate in the dependency stack — values are
//! parsed with `str::parse` and a malformed value is a fatal `ConfigError`,
//! per REDESIGN FLAGS in `SPEC_FULL.md`.

use std::path::PathBuf;
use std::time::Duration;

use plan_contracts::error::{EngineError, EngineResult};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> EngineResult<T> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| EngineError::ConfigError {
            reason: format!("{name} must be a valid value, got '{raw}'"),
        }),
    }
}

/// The messaging backend selected by `MESSAGING_TYPE`. The workspace ships
/// no `lapin`/`rdkafka` dependency, so only `InProcess` is actually
/// constructible today; the variants exist so the config surface matches
/// spec §6 without fabricating a broker client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagingType {
    InProcess,
    RabbitMq,
    Kafka,
}

/// Everything the engine needs at startup, gathered from the process
/// environment in one place.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `PLAN_STATE_PATH`, default `data/plan-state.json` (spec §6).
    pub state_path: PathBuf,
    /// `QUEUE_RETRY_MAX`, default 5 (spec §4.6).
    pub queue_retry_max: u32,
    /// `QUEUE_RETRY_BACKOFF_MS`, default 0 meaning immediate requeue.
    pub queue_retry_backoff_ms: u64,
    /// `SSE_KEEP_ALIVE_MS`, default 25_000 (spec §4.7).
    pub sse_keep_alive_ms: u64,
    /// `TOOL_CLIENT_RETRY_MAX`, default 2 (`plan_client::ClientConfig`).
    pub tool_client_retry_max: u32,
    /// `TOOL_CLIENT_RETRY_BASE_DELAY_MS`, default 200.
    pub tool_client_retry_base_delay_ms: u64,
    /// `TOOL_CLIENT_DEFAULT_TIMEOUT_SECONDS`, default 30.
    pub tool_client_default_timeout_seconds: u64,
    /// `EVENT_BUS_PURGE_INTERVAL_SECS`, default 60.
    pub event_bus_purge_interval: Duration,
    /// `MESSAGING_TYPE`, default `in-process`.
    pub messaging_type: MessagingType,
}

impl EngineConfig {
    /// Parse the config from the current process environment. Fails fast
    /// (spec §6, "non-zero on startup failure") on any malformed value.
    pub fn from_env() -> EngineResult<Self> {
        let messaging_type = match env_or("MESSAGING_TYPE", "in-process").as_str() {
            "in-process" => MessagingType::InProcess,
            "rabbitmq" => MessagingType::RabbitMq,
            "kafka" => MessagingType::Kafka,
            other => {
                return Err(EngineError::ConfigError {
                    reason: format!("MESSAGING_TYPE must be one of in-process|rabbitmq|kafka, got '{other}'"),
                })
            }
        };

        if !matches!(messaging_type, MessagingType::InProcess) {
            return Err(EngineError::ConfigError {
                reason: format!(
                    "MESSAGING_TYPE '{messaging_type:?}' has no adapter in this build; only in-process is available"
                ),
            });
        }

        Ok(Self {
            state_path: PathBuf::from(env_or("PLAN_STATE_PATH", "data/plan-state.json")),
            queue_retry_max: parse_env("QUEUE_RETRY_MAX", 5)?,
            queue_retry_backoff_ms: parse_env("QUEUE_RETRY_BACKOFF_MS", 0)?,
            sse_keep_alive_ms: parse_env("SSE_KEEP_ALIVE_MS", 25_000)?,
            tool_client_retry_max: parse_env("TOOL_CLIENT_RETRY_MAX", 2)?,
            tool_client_retry_base_delay_ms: parse_env("TOOL_CLIENT_RETRY_BASE_DELAY_MS", 200)?,
            tool_client_default_timeout_seconds: parse_env("TOOL_CLIENT_DEFAULT_TIMEOUT_SECONDS", 30)?,
            event_bus_purge_interval: Duration::from_secs(parse_env("EVENT_BUS_PURGE_INTERVAL_SECS", 60)?),
            messaging_type,
        })
    }
}
