//! Configuration vault – reads/writes `~/.rafa/config.toml`.
//!
//! The same file backs the runtime's [`PreferenceStore`]: every
//! [`FilePreferences::set`] rewrites it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rafa_middleware::messaging::DEFAULT_TOPICS;
use rafa_runtime::chat::DEFAULT_MODEL;
use rafa_runtime::triggers::DEFAULT_TRIGGERS;
use rafa_runtime::{PrefKey, PreferenceStore};
use rafa_types::RafaError;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Persisted operator configuration.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Config {
    /// e.g. `tcp://10.14.0.182:1883`
    #[serde(default = "default_broker")]
    pub broker_address: String,

    #[serde(default = "default_user")]
    pub mqtt_user: String,

    #[serde(default = "default_password")]
    pub mqtt_password: String,

    #[serde(default = "default_client_id")]
    pub mqtt_client_id: String,

    /// Bearer token for the chat service.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chat_token: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Language the assistant answers in.
    #[serde(default = "default_language")]
    pub language: String,

    /// Wake phrases, checked in order.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,

    /// Broker topics subscribed when messaging starts.
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("broker_address", &self.broker_address)
            .field("mqtt_user", &self.mqtt_user)
            .field("mqtt_password", &redacted(&self.mqtt_password))
            .field("mqtt_client_id", &self.mqtt_client_id)
            .field("chat_token", &redacted(&self.chat_token))
            .field("chat_model", &self.chat_model)
            .field("language", &self.language)
            .field("triggers", &self.triggers)
            .field("topics", &self.topics)
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "<not set>" } else { "<redacted>" }
}

fn default_broker() -> String {
    PrefKey::BrokerAddress.default_value().to_string()
}
fn default_user() -> String {
    PrefKey::MqttUser.default_value().to_string()
}
fn default_password() -> String {
    PrefKey::MqttPassword.default_value().to_string()
}
fn default_client_id() -> String {
    PrefKey::MqttClientId.default_value().to_string()
}
fn default_chat_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_language() -> String {
    PrefKey::Language.default_value().to_string()
}
fn default_triggers() -> Vec<String> {
    DEFAULT_TRIGGERS.iter().map(|s| s.to_string()).collect()
}
fn default_topics() -> Vec<String> {
    DEFAULT_TOPICS.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_address: default_broker(),
            mqtt_user: default_user(),
            mqtt_password: default_password(),
            mqtt_client_id: default_client_id(),
            chat_token: String::new(),
            chat_model: default_chat_model(),
            language: default_language(),
            triggers: default_triggers(),
            topics: default_topics(),
        }
    }
}

impl Config {
    pub fn get(&self, key: PrefKey) -> &str {
        match key {
            PrefKey::BrokerAddress => &self.broker_address,
            PrefKey::MqttUser => &self.mqtt_user,
            PrefKey::MqttPassword => &self.mqtt_password,
            PrefKey::MqttClientId => &self.mqtt_client_id,
            PrefKey::ChatToken => &self.chat_token,
            PrefKey::Language => &self.language,
        }
    }

    pub fn set(&mut self, key: PrefKey, value: &str) {
        let slot = match key {
            PrefKey::BrokerAddress => &mut self.broker_address,
            PrefKey::MqttUser => &mut self.mqtt_user,
            PrefKey::MqttPassword => &mut self.mqtt_password,
            PrefKey::MqttClientId => &mut self.mqtt_client_id,
            PrefKey::ChatToken => &mut self.chat_token,
            PrefKey::Language => &mut self.language,
        };
        slot.zeroize();
        slot.push_str(value);
    }
}

/// Return the path to `~/.rafa/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rafa").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, RafaError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, RafaError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        RafaError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| RafaError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `RAFA_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RAFA_BROKER` | `broker_address` |
/// | `RAFA_CHAT_TOKEN` | `chat_token` |
/// | `RAFA_CHAT_MODEL` | `chat_model` |
/// | `RAFA_LANGUAGE` | `language` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RAFA_BROKER") {
        cfg.broker_address = v;
    }
    if let Ok(v) = std::env::var("RAFA_CHAT_TOKEN") {
        cfg.chat_token = v;
    }
    if let Ok(v) = std::env::var("RAFA_CHAT_MODEL")
        && !v.trim().is_empty()
    {
        cfg.chat_model = v;
    }
    if let Ok(v) = std::env::var("RAFA_LANGUAGE")
        && !v.trim().is_empty()
    {
        cfg.language = v;
    }
}

/// Save the config to disk, creating `~/.rafa/` if necessary.
pub fn save(cfg: &Config) -> Result<(), RafaError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), RafaError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| RafaError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                RafaError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RafaError::Config(format!("failed to serialize config: {e}")))?;
    let write_error =
        |e: std::io::Error| RafaError::Config(format!("failed to write config at {}: {e}", path.display()));
    // Owner-only (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_error)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_error)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// File-backed preference store
// ─────────────────────────────────────────────────────────────────────────────

/// [`PreferenceStore`] that persists every change to the config file.
pub struct FilePreferences {
    path: PathBuf,
    config: Mutex<Config>,
}

impl FilePreferences {
    pub fn new(path: PathBuf, config: Config) -> Self {
        Self {
            path,
            config: Mutex::new(config),
        }
    }

    pub fn snapshot(&self) -> Config {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: PrefKey) -> String {
        self.lock().get(key).to_string()
    }

    fn set(&self, key: PrefKey, value: &str) -> Result<(), RafaError> {
        let mut cfg = self.lock();
        cfg.set(key, value);
        save_to(&cfg, &self.path)
    }
}
