//! `POST /api/v1/classify` — one-shot signal classification.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use osa_domain::signal::ChannelKind;

use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub message: String,
    #[serde(default)]
    pub channel: Option<String>,
}

fn parse_channel(s: &str) -> ChannelKind {
    match s.to_ascii_lowercase().as_str() {
        "cli" => ChannelKind::Cli,
        "http" => ChannelKind::Http,
        "telegram" => ChannelKind::Telegram,
        "discord" => ChannelKind::Discord,
        "slack" => ChannelKind::Slack,
        "whatsapp" => ChannelKind::Whatsapp,
        "webhook" => ChannelKind::Webhook,
        "filesystem" => ChannelKind::Filesystem,
        _ => ChannelKind::Other,
    }
}

pub async fn classify(
    State(state): State<AppState>,
    Json(body): Json<ClassifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.message.is_empty() {
        return Err(ApiError::invalid("message must not be empty"));
    }
    let channel = body
        .channel
        .as_deref()
        .map(parse_channel)
        .unwrap_or(ChannelKind::Http);
    let signal = state.rt.classifier.classify(&body.message, channel).await;
    Ok(Json(serde_json::json!({ "signal": signal })))
}
