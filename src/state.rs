use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::connectors::ToolPlan;
use crate::error::ConfigError;
use crate::types::Config;

/// An email composed but not yet sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEmailDraft {
    pub to: Vec<String>,
    pub subject: String,
    /// Sanitized body before any style ran. Restyling always starts here.
    pub raw_body: String,
    pub styled_body: String,
    pub applied_styles: Vec<String>,
}

/// Per-conversation state, passed into and returned from `Agent::handle`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_email: Option<PendingEmailDraft>,
    /// Last fallback plan, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output: Option<ToolPlan>,
}

/// In-memory conversation states keyed by user id.
///
/// Each conversation has its own lock, so two messages from one user are
/// handled one after another while different users never wait on each other.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: DashMap<String, Arc<Mutex<AgentState>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding one conversation, created empty on first use.
    pub fn slot(&self, user_id: &str) -> Arc<Mutex<AgentState>> {
        self.conversations
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// The lock for an existing conversation. Never creates one.
    pub fn existing(&self, user_id: &str) -> Option<Arc<Mutex<AgentState>>> {
        self.conversations.get(user_id).map(|s| s.clone())
    }

    /// Drop a conversation once it has nothing pending and no request holds
    /// its lock. The diagnostic `last_output` goes with it. Returns whether
    /// the entry was removed.
    pub fn release(&self, user_id: &str) -> bool {
        self.conversations
            .remove_if(user_id, |_, slot| {
                Arc::strong_count(slot) == 1
                    && slot
                        .try_lock()
                        .is_ok_and(|state| state.pending_email.is_none())
            })
            .is_some()
    }

    /// Copy of a conversation's state, if it has one.
    pub async fn snapshot(&self, user_id: &str) -> Option<AgentState> {
        let slot = self.existing(user_id)?;
        let state = slot.lock().await;
        Some(state.clone())
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

// ============================================================================
// Config loading
// ============================================================================

/// `$ECHO_CONFIG`, else `~/.echo-orchestrator/config.json`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ECHO_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::home_dir()
        .unwrap_or_default()
        .join(".echo-orchestrator")
        .join("config.json")
}

/// Load config from disk, then apply environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    let mut config = load_config_file(&config_path())?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// A missing file yields defaults; an unreadable or malformed one is an error.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Override config fields from environment-style lookups. Empty values are
/// ignored; unparseable booleans and numbers are logged and ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("TIMEZONE") {
        config.timezone = v;
    }
    if let Some(v) = get("TIMELINE_BASE_URL") {
        config.timeline_base_url = v;
    }
    if let Some(v) = get("MSG_PROXY_BASE_URL") {
        config.msg_proxy_base_url = v;
    }
    if let Some(v) = get("GOOGLE_TOKEN_PATH") {
        config.google_token_path = Some(v);
    }
    if let Some(v) = get("CALENDAR_ENABLED") {
        match parse_bool(&v) {
            Some(b) => config.calendar_enabled = b,
            None => log::warn!("Ignoring CALENDAR_ENABLED={}", v),
        }
    }
    if let Some(v) = get("EMAIL_FROM") {
        config.email_from = Some(v);
    }
    if let Some(v) = get("ORCHESTRATOR_BIND") {
        config.bind_addr = v;
    }
    if let Some(v) = get("COLLABORATOR_TIMEOUT_SECS") {
        match v.trim().parse::<u64>() {
            Ok(secs) => config.collaborator_timeout_secs = secs,
            Err(_) => log::warn!("Ignoring COLLABORATOR_TIMEOUT_SECS={}", v),
        }
    }
    if let Some(v) = get("EMAIL_SIGNATURE") {
        config.signature = v;
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configured token path, else the default under the home directory.
pub fn google_token_path(config: &Config) -> PathBuf {
    config
        .google_token_path
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(crate::google_api::default_token_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_release_drops_idle_conversation() {
        let store = ConversationStore::new();
        let slot = store.slot("u1");
        assert!(!store.release("u1"), "slot still held by a request");

        slot.lock().await.last_output = Some(ToolPlan::new());
        drop(slot);
        assert!(store.release("u1"));
        assert!(store.is_empty());
        assert!(store.existing("u1").is_none());
        assert!(store.snapshot("u1").await.is_none());
    }

    #[tokio::test]
    async fn test_release_keeps_pending_draft() {
        let store = ConversationStore::new();
        store.slot("u2").lock().await.pending_email = Some(PendingEmailDraft {
            to: vec!["bob@x.com".to_string()],
            subject: "Lunch".to_string(),
            raw_body: "noon?".to_string(),
            styled_body: "noon?".to_string(),
            applied_styles: vec![],
        });
        assert!(!store.release("u2"));
        assert_eq!(store.len(), 1);
        assert!(store.snapshot("u2").await.unwrap().pending_email.is_some());
    }

    #[test]
    fn test_missing_config_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_file(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8002");
    }

    #[test]
    fn test_config_file_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"timezone": "Asia/Kolkata", "calendarEnabled": false, "emailFrom": "me@x.com"}"#,
        )
        .unwrap();
        let config = load_config_file(&path).unwrap();
        assert_eq!(config.tz(), chrono_tz::Asia::Kolkata);
        assert!(!config.calendar_enabled);
        assert_eq!(config.email_from.as_deref(), Some("me@x.com"));
    }

    #[test]
    fn test_malformed_config_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_config_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TIMEZONE", "Europe/Berlin"),
            ("CALENDAR_ENABLED", "0"),
            ("COLLABORATOR_TIMEOUT_SECS", "5"),
            ("GOOGLE_TOKEN_PATH", "/tmp/token.json"),
            ("EMAIL_SIGNATURE", ""),
            ("ORCHESTRATOR_BIND", "0.0.0.0:9000"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.timezone, "Europe/Berlin");
        assert!(!config.calendar_enabled);
        assert_eq!(config.collaborator_timeout_secs, 5);
        assert_eq!(google_token_path(&config), PathBuf::from("/tmp/token.json"));
        assert_eq!(config.signature, "Echo Agent");
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| match k {
            "CALENDAR_ENABLED" => Some("maybe".to_string()),
            "COLLABORATOR_TIMEOUT_SECS" => Some("soon".to_string()),
            _ => None,
        });
        assert!(config.calendar_enabled);
        assert_eq!(config.collaborator_timeout_secs, 15);
    }

    #[tokio::test]
    async fn test_store_slots_are_per_user() {
        let store = ConversationStore::new();
        assert!(store.snapshot("u1").await.is_none());

        {
            let slot = store.slot("u1");
            let mut state = slot.lock().await;
            state.pending_email = Some(PendingEmailDraft {
                to: vec!["bob@x.com".to_string()],
                subject: "Hi".to_string(),
                raw_body: "Hi".to_string(),
                styled_body: "Hi".to_string(),
                applied_styles: vec![],
            });
        }

        assert!(store.snapshot("u1").await.unwrap().pending_email.is_some());
        assert_eq!(store.snapshot("u2").await, None);
        let _ = store.slot("u2");
        assert_eq!(store.len(), 2);
        assert_eq!(store.snapshot("u2").await, Some(AgentState::default()));
    }

    #[test]
    fn test_agent_state_serializes_compactly() {
        let json = serde_json::to_value(AgentState::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
