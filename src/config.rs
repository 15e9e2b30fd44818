//! Engine configuration

use crate::prompt::DEFAULT_MAX_TURNS;
use std::path::PathBuf;

pub const DB_PATH_ENV: &str = "TOPICAL_DB_PATH";
pub const PROMPT_MAX_TURNS_ENV: &str = "TOPICAL_PROMPT_MAX_TURNS";
pub const RESET_ON_ERROR_ENV: &str = "TOPICAL_RESET_ON_ERROR";
pub const CHANNEL_CAPACITY_ENV: &str = "TOPICAL_CHANNEL_CAPACITY";
pub const CONVERSATION_ID_ENV: &str = "TOPICAL_CONVERSATION_ID";

/// Runtime and store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    /// Turn budget for prompts spawned by forms
    pub prompt_max_turns: u32,
    /// Reset a conversation after a failed turn
    pub reset_on_error: bool,
    /// Request queue depth per conversation task
    pub channel_capacity: usize,
    /// Conversation the CLI drives
    pub conversation_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(None),
            prompt_max_turns: DEFAULT_MAX_TURNS,
            reset_on_error: true,
            channel_capacity: 32,
            conversation_id: "local".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            db_path: lookup(DB_PATH_ENV)
                .map_or_else(|| default_db_path(lookup("HOME")), PathBuf::from),
            prompt_max_turns: parse_or(&lookup, PROMPT_MAX_TURNS_ENV, defaults.prompt_max_turns)
                .max(1),
            reset_on_error: parse_flag(&lookup, RESET_ON_ERROR_ENV, defaults.reset_on_error),
            channel_capacity: parse_or(&lookup, CHANNEL_CAPACITY_ENV, defaults.channel_capacity)
                .max(1),
            conversation_id: lookup(CONVERSATION_ID_ENV)
                .filter(|id| !id.is_empty())
                .unwrap_or(defaults.conversation_id),
        }
    }
}

fn default_db_path(home: Option<String>) -> PathBuf {
    let home = home
        .or_else(|| std::env::var("HOME").ok())
        .unwrap_or_else(|| "/tmp".to_string());
    PathBuf::from(home).join(".topical").join("topical.db")
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid config value, using default");
            default
        }),
        None => default,
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).as_deref().map(str::trim) {
        None => default,
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(other) => {
            tracing::warn!(key, value = %other, "Invalid config flag, using default");
            default
        }
    }
}
