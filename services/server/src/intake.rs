use crate::state::AppState;
use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use callbridge_core::intake::{IntakeError, accept_call};
use callbridge_core::session::CallSetup;

/// Call-setup webhook. Fields arrive as a form body on POST and as the query
/// string on GET.
pub async fn incoming_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(setup): Form<CallSetup>,
) -> Response {
    let host = state.config.public_host.clone().or_else(|| {
        headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
    });
    let Some(host) = host else {
        tracing::error!("no public host configured and no Host header");
        return (StatusCode::INTERNAL_SERVER_ERROR, "public host unknown").into_response();
    };
    let stream_url = format!("wss://{host}/media-stream");

    match accept_call(
        state.backend.as_ref(),
        &state.sessions,
        setup,
        &state.relay.default_greeting,
        &stream_url,
    )
    .await
    {
        Ok(twiml) => ([(header::CONTENT_TYPE, "text/xml")], twiml).into_response(),
        Err(e @ IntakeError::MissingCallId) => {
            tracing::warn!("rejecting call setup: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}
