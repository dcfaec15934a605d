use anyhow::Result;
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use super::config::Config;
use super::consts;

pub(crate) fn build_request(config: &Config) -> Result<Request> {
    let url = format!("{}/realtime?model={}", config.base_url(), config.model());
    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        consts::AUTHORIZATION_HEADER,
        format!("Bearer {}", config.api_key().expose_secret()).parse()?,
    );
    headers.insert(consts::OPENAI_BETA_HEADER, consts::OPENAI_BETA_VALUE.parse()?);
    Ok(request)
}
