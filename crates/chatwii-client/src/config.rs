//! Client configuration loaded from environment variables.
//!
//! Every knob has a default, so mock mode starts with zero configuration.
//! Provider endpoints and keys only matter when real vendor adapters are
//! plugged in.

use std::time::Duration;

use chatwii_shared::constants::{
    NICKNAME_CHECK_TIMEOUT_MS, RECONNECT_THROTTLE_MS, REPLY_FETCH_TIMEOUT_MS,
    SYNC_SETUP_TIMEOUT_MS, TYPING_DEBOUNCE_MS, TYPING_STALE_MS,
};

use crate::settings::ClientSettings;

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Realtime database endpoint.
    /// Env: `CHATWII_REALTIME_URL`
    /// Default: empty (mock backend).
    pub realtime_url: String,

    /// Relational provider endpoint.
    /// Env: `CHATWII_RELATIONAL_URL`
    /// Default: empty (mock backend).
    pub relational_url: String,

    /// Public API key for both providers.
    /// Env: `CHATWII_API_KEY`
    pub api_key: Option<String>,

    /// CAPTCHA site key handed to the sign-in form.
    /// Env: `CHATWII_CAPTCHA_SITE_KEY`
    pub captcha_site_key: Option<String>,

    /// Mock mode forced from the environment. When unset the persisted
    /// [`ClientSettings`] decide.
    /// Env: `CHATWII_MOCK_MODE` (true/false)
    pub mock_mode_override: Option<bool>,

    /// How long a conversation may stay in setup before falling back to a
    /// direct fetch.
    /// Env: `CHATWII_SYNC_TIMEOUT_MS`
    /// Default: 5000
    pub sync_timeout: Duration,

    /// Env: `CHATWII_TYPING_DEBOUNCE_MS`
    /// Default: 300
    pub typing_debounce: Duration,

    /// Env: `CHATWII_TYPING_STALE_MS`
    /// Default: 5000
    pub typing_stale: Duration,

    /// Minimum spacing between manual reconnect attempts.
    /// Env: `CHATWII_RECONNECT_THROTTLE_MS`
    /// Default: 5000
    pub reconnect_throttle: Duration,

    /// Deadline for loading a reply target.
    /// Env: `CHATWII_REPLY_TIMEOUT_MS`
    /// Default: 3000
    pub reply_timeout: Duration,

    /// Deadline for the nickname availability check at sign-in.
    pub nickname_check_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            realtime_url: String::new(),
            relational_url: String::new(),
            api_key: None,
            captcha_site_key: None,
            mock_mode_override: None,
            sync_timeout: Duration::from_millis(SYNC_SETUP_TIMEOUT_MS),
            typing_debounce: Duration::from_millis(TYPING_DEBOUNCE_MS),
            typing_stale: Duration::from_millis(TYPING_STALE_MS),
            reconnect_throttle: Duration::from_millis(RECONNECT_THROTTLE_MS),
            reply_timeout: Duration::from_millis(REPLY_FETCH_TIMEOUT_MS),
            nickname_check_timeout: Duration::from_millis(NICKNAME_CHECK_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CHATWII_REALTIME_URL") {
            config.realtime_url = url;
        }

        if let Some(url) = lookup("CHATWII_RELATIONAL_URL") {
            config.relational_url = url;
        }

        if let Some(key) = lookup("CHATWII_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }

        if let Some(key) = lookup("CHATWII_CAPTCHA_SITE_KEY") {
            if !key.is_empty() {
                config.captcha_site_key = Some(key);
            }
        }

        if let Some(val) = lookup("CHATWII_MOCK_MODE") {
            config.mock_mode_override = Some(val != "false" && val != "0");
        }

        let millis = |name: &str, current: Duration| match lookup(name) {
            Some(val) => match val.parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(variable = name, value = %val, "Invalid duration, using default");
                    current
                }
            },
            None => current,
        };

        config.sync_timeout = millis("CHATWII_SYNC_TIMEOUT_MS", config.sync_timeout);
        config.typing_debounce = millis("CHATWII_TYPING_DEBOUNCE_MS", config.typing_debounce);
        config.typing_stale = millis("CHATWII_TYPING_STALE_MS", config.typing_stale);
        config.reconnect_throttle =
            millis("CHATWII_RECONNECT_THROTTLE_MS", config.reconnect_throttle);
        config.reply_timeout = millis("CHATWII_REPLY_TIMEOUT_MS", config.reply_timeout);

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    /// Effective mock flag: the environment wins over the settings file.
    pub fn mock_mode(&self, settings: &ClientSettings) -> bool {
        self.mock_mode_override.unwrap_or(settings.mock_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.sync_timeout, Duration::from_secs(5));
        assert_eq!(config.typing_debounce, Duration::from_millis(300));
        assert_eq!(config.reply_timeout, Duration::from_secs(3));
        assert!(config.api_key.is_none());
        assert!(config.mock_mode_override.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("CHATWII_REALTIME_URL", "https://rt.example"),
            ("CHATWII_API_KEY", ""),
            ("CHATWII_MOCK_MODE", "0"),
            ("CHATWII_SYNC_TIMEOUT_MS", "1500"),
            ("CHATWII_REPLY_TIMEOUT_MS", "soon"),
        ]));
        assert_eq!(config.realtime_url, "https://rt.example");
        assert!(config.api_key.is_none());
        assert_eq!(config.mock_mode_override, Some(false));
        assert_eq!(config.sync_timeout, Duration::from_millis(1500));
        assert_eq!(config.reply_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_env_mock_mode_wins_over_settings() {
        let settings = ClientSettings {
            mock_mode: true,
            ..ClientSettings::default()
        };
        assert!(ClientConfig::default().mock_mode(&settings));

        let config = ClientConfig::from_lookup(lookup(&[("CHATWII_MOCK_MODE", "false")]));
        assert!(!config.mock_mode(&settings));
    }
}
