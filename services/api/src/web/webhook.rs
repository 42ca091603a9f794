//! services/api/src/web/webhook.rs
//!
//! Receives subscription events from the payment processor. The processor is
//! authenticated with a shared secret; events are applied at most once by id.

use crate::error::ApiError;
use crate::web::protocol::{parse_event_kind, SubscriptionEventPayload, SubscriptionEventResponse};
use crate::web::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use revision_core::domain::SubscriptionEvent;
use std::sync::Arc;
use tracing::warn;

/// The header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Compares two secrets without exiting early on the first differing byte.
fn secrets_match(expected: &str, given: &str) -> bool {
    expected.len() == given.len()
        && expected
            .bytes()
            .zip(given.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Apply a subscription event from the payment processor.
///
/// Re-delivered events (same `event_id`) are acknowledged without changing anything.
/// The body is only parsed once the secret has been checked.
#[utoipa::path(
    post,
    path = "/subscription/events",
    request_body = SubscriptionEventPayload,
    responses(
        (status = 200, description = "Event accepted", body = SubscriptionEventResponse),
        (status = 400, description = "Malformed body or unknown event kind"),
        (status = 401, description = "Missing or wrong secret")
    ),
    params(
        ("x-webhook-secret" = String, Header, description = "Shared secret configured for the payment processor.")
    )
)]
pub async fn subscription_event_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SubscriptionEventResponse>, ApiError> {
    // An unconfigured secret disables the endpoint.
    let expected = state
        .config
        .webhook_secret
        .as_deref()
        .ok_or(ApiError::Unauthorized)?;
    let given = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secrets_match(expected, given) {
        warn!("Subscription event rejected: bad secret");
        return Err(ApiError::Unauthorized);
    }

    let payload: SubscriptionEventPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid subscription event: {}", e)))?;

    let kind = parse_event_kind(&payload.kind)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown event kind '{}'", payload.kind)))?;
    if payload.event_id.trim().is_empty() {
        return Err(ApiError::BadRequest("event_id must not be empty".to_string()));
    }

    let event = SubscriptionEvent {
        event_id: payload.event_id,
        user_id: payload.user_id,
        kind,
        received_at: Utc::now(),
    };
    let applied = state.engine.apply_subscription_event(&event).await?;
    Ok(Json(SubscriptionEventResponse { applied }))
}

#[cfg(test)]
mod tests {
    use super::secrets_match;

    #[test]
    fn secrets_must_match_exactly() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cret", "s3cre"));
        assert!(!secrets_match("s3cret", "S3cret"));
        assert!(!secrets_match("s3cret", ""));
    }
}
