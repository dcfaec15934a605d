use crate::config::Config;
use callbridge_core::{Backend, RelaySettings, SessionStore, WebhookClient};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// Shared by every request; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    pub backend: Arc<dyn Backend>,
    pub relay: Arc<RelaySettings>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let backend = Arc::new(WebhookClient::new(&config.backend_webhook_url));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: Config, backend: Arc<dyn Backend>) -> Self {
        let relay = RelaySettings {
            voice: config.voice.clone(),
            instructions: config.system_instructions.clone(),
            default_greeting: config.default_greeting.clone(),
            complaints_enabled: config.enable_complaints,
        };
        Self {
            config: Arc::new(config),
            sessions: SessionStore::new(),
            backend,
            relay: Arc::new(relay),
        }
    }

    /// Connection settings for one call's model socket.
    pub fn model_config(&self) -> callbridge_realtime::Config {
        callbridge_realtime::Config::builder()
            .with_base_url(&self.config.realtime_url)
            .with_api_key(SecretString::from(
                self.config.openai_api_key.expose_secret().to_string(),
            ))
            .with_model(&self.config.realtime_model)
            .build()
    }
}
