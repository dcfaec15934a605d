//! Service configuration, read once at startup from the environment.

use callbridge_core::relay::{DEFAULT_GREETING, DEFAULT_INSTRUCTIONS};
use callbridge_realtime::types::audio::Voice;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5050";
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

pub struct Config {
    pub bind_address: SocketAddr,
    /// Host name the provider should dial back for the media stream. Falls
    /// back to the request's `Host` header when unset.
    pub public_host: Option<String>,
    pub openai_api_key: SecretString,
    pub backend_webhook_url: String,
    pub realtime_url: String,
    pub realtime_model: String,
    pub voice: Voice,
    pub system_instructions: String,
    pub default_greeting: String,
    pub enable_complaints: bool,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from the process environment, after reading a
    /// `.env` file if one exists.
    ///
    /// *   `OPENAI_API_KEY`: Required. Key for the realtime model.
    /// *   `BACKEND_WEBHOOK_URL`: Required. The business backend's webhook.
    /// *   `BIND_ADDRESS`: Defaults to `0.0.0.0:5050`, or `0.0.0.0:$PORT` when only `PORT` is set.
    /// *   `PUBLIC_HOST`: Host used in the stream URL handed to the provider.
    /// *   `REALTIME_URL`, `REALTIME_MODEL`, `REALTIME_VOICE`: Model endpoint, model and voice.
    /// *   `SYSTEM_INSTRUCTIONS`, `DEFAULT_GREETING`: Prompting.
    /// *   `ENABLE_COMPLAINTS`: Offer the `store_complaint` function. Defaults to false.
    /// *   `RUST_LOG`: The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &str| var(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));

        let bind_address_str = match (var("BIND_ADDRESS"), var("PORT")) {
            (Some(address), _) => address,
            (None, Some(port)) => format!("0.0.0.0:{}", port.trim()),
            (None, None) => DEFAULT_BIND_ADDRESS.to_string(),
        };
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let openai_api_key = SecretString::from(required("OPENAI_API_KEY")?);
        let backend_webhook_url = required("BACKEND_WEBHOOK_URL")?;
        if !backend_webhook_url.starts_with("http://") && !backend_webhook_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "BACKEND_WEBHOOK_URL".to_string(),
                format!("'{}' is not an http(s) URL", backend_webhook_url),
            ));
        }

        let voice = match var("REALTIME_VOICE") {
            Some(name) => {
                let Ok(voice) = Voice::from_str(name.trim());
                voice
            }
            None => Voice::Alloy,
        };

        let enable_complaints = match var("ENABLE_COMPLAINTS") {
            Some(flag) => parse_flag(&flag).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "ENABLE_COMPLAINTS".to_string(),
                    format!("'{}' is not a boolean", flag),
                )
            })?,
            None => false,
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            public_host: var("PUBLIC_HOST").map(|host| {
                host.trim()
                    .trim_start_matches("https://")
                    .trim_start_matches("wss://")
                    .trim_end_matches('/')
                    .to_string()
            }),
            openai_api_key,
            backend_webhook_url,
            realtime_url: var("REALTIME_URL").unwrap_or_else(|| DEFAULT_REALTIME_URL.to_string()),
            realtime_model: var("REALTIME_MODEL")
                .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
            voice,
            system_instructions: var("SYSTEM_INSTRUCTIONS")
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            default_greeting: var("DEFAULT_GREETING")
                .unwrap_or_else(|| DEFAULT_GREETING.to_string()),
            enable_complaints,
            log_level,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("OPENAI_API_KEY", "sk-test"),
        ("BACKEND_WEBHOOK_URL", "https://hooks.example.com/call"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_set() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.bind_address.to_string(), DEFAULT_BIND_ADDRESS);
        assert_eq!(config.openai_api_key.expose_secret(), "sk-test");
        assert_eq!(config.realtime_url, DEFAULT_REALTIME_URL);
        assert_eq!(config.voice, Voice::Alloy);
        assert_eq!(config.default_greeting, DEFAULT_GREETING);
        assert!(!config.enable_complaints);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.public_host, None);
    }

    #[test]
    fn missing_required_vars_are_reported() {
        let err = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).err().unwrap();
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "BACKEND_WEBHOOK_URL"));

        let err = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "  "),
            ("BACKEND_WEBHOOK_URL", "https://hooks.example.com"),
        ]))
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "OPENAI_API_KEY"));
    }

    #[test]
    fn port_alone_sets_the_bind_address() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "8080"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8080");

        pairs.push(("BIND_ADDRESS", "127.0.0.1:9000"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.bind_address.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn optional_values_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PUBLIC_HOST", "https://calls.example.com/"),
            ("REALTIME_VOICE", "shimmer"),
            ("ENABLE_COMPLAINTS", "Yes"),
            ("RUST_LOG", "debug"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.public_host.as_deref(), Some("calls.example.com"));
        assert_eq!(config.voice, Voice::Shimmer);
        assert!(config.enable_complaints);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (key, value) in [
            ("BIND_ADDRESS", "not-an-address"),
            ("ENABLE_COMPLAINTS", "maybe"),
            ("RUST_LOG", "loud"),
            ("BACKEND_WEBHOOK_URL", "ftp://hooks.example.com"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.retain(|(k, _)| *k != key);
            pairs.push((key, value));
            let err = Config::from_lookup(lookup(&pairs)).err().unwrap();
            assert!(
                matches!(err, ConfigError::InvalidValue(ref k, _) if k == key),
                "{key} should be invalid"
            );
        }
    }
}
