//! Key → string preference storage.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rafa_types::RafaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKey {
    BrokerAddress,
    MqttUser,
    MqttPassword,
    MqttClientId,
    ChatToken,
    Language,
}

impl PrefKey {
    pub const ALL: [PrefKey; 6] = [
        PrefKey::BrokerAddress,
        PrefKey::MqttUser,
        PrefKey::MqttPassword,
        PrefKey::MqttClientId,
        PrefKey::ChatToken,
        PrefKey::Language,
    ];

    /// Value returned when nothing was stored.
    pub fn default_value(self) -> &'static str {
        match self {
            PrefKey::BrokerAddress => "tcp://10.14.0.182:1883",
            PrefKey::MqttUser => "intecfull",
            PrefKey::MqttPassword => "intecfullpassword",
            PrefKey::MqttClientId => "Robot",
            PrefKey::ChatToken => "",
            PrefKey::Language => "Español",
        }
    }

    pub fn is_secret(self) -> bool {
        matches!(self, PrefKey::MqttPassword | PrefKey::ChatToken)
    }
}

pub trait PreferenceStore: Send + Sync {
    /// Stored value, or [`PrefKey::default_value`].
    fn get(&self, key: PrefKey) -> String;

    fn set(&self, key: PrefKey, value: &str) -> Result<(), RafaError>;
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<PrefKey, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PrefKey, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: PrefKey) -> String {
        self.lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.default_value().to_string())
    }

    fn set(&self, key: PrefKey, value: &str) -> Result<(), RafaError> {
        self.lock().insert(key, value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_keys_return_defaults() {
        let prefs = MemoryPreferences::new();
        assert_eq!(prefs.get(PrefKey::BrokerAddress), "tcp://10.14.0.182:1883");
        assert_eq!(prefs.get(PrefKey::MqttClientId), "Robot");
        assert_eq!(prefs.get(PrefKey::ChatToken), "");
    }

    #[test]
    fn set_overrides_default() {
        let prefs = MemoryPreferences::new();
        prefs.set(PrefKey::MqttUser, "alumno").unwrap();
        assert_eq!(prefs.get(PrefKey::MqttUser), "alumno");
        assert_eq!(prefs.get(PrefKey::MqttPassword), "intecfullpassword");
    }

    #[test]
    fn only_password_and_token_are_secret() {
        let secrets: Vec<PrefKey> = PrefKey::ALL.into_iter().filter(|k| k.is_secret()).collect();
        assert_eq!(secrets, vec![PrefKey::MqttPassword, PrefKey::ChatToken]);
    }
}
