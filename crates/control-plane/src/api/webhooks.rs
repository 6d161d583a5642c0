// Clerk webhook receiver
// Decision: Verify Svix signatures whenever a signing secret is configured
// Decision: Only user.created, user.updated and user.deleted change local state

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use utoipa::ToSchema;

use super::common::{ApiError, ApiResponse, ApiResult, MessageResponse};
use crate::services::UserService;

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock skew accepted on `svix-timestamp`
pub const SIGNATURE_TOLERANCE_SECS: u64 = 5 * 60;

/// App state for webhook routes
#[derive(Clone)]
pub struct WebhookState {
    pub users: UserService,
    /// `whsec_...` signing secret; verification is skipped when None
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing signature headers")]
    MissingHeaders,
    #[error("Webhook secret is not valid base64")]
    InvalidSecret,
    #[error("Timestamp outside tolerance")]
    TimestampOutOfRange,
    #[error("No matching signature")]
    InvalidSignature,
}

/// Webhook envelope as sent by Clerk
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClerkWebhookEvent {
    #[serde(rename = "type", default)]
    #[schema(example = "user.created")]
    pub event_type: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClerkVerification {
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClerkEmailAddress {
    pub id: String,
    pub email_address: String,
    #[serde(default)]
    pub verification: Option<ClerkVerification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClerkPhoneNumber {
    pub id: String,
    pub phone_number: String,
    #[serde(default)]
    pub verification: Option<ClerkVerification>,
}

/// `data` of user.created and user.updated events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClerkUserData {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<ClerkEmailAddress>,
    #[serde(default)]
    pub primary_email_address_id: Option<String>,
    #[serde(default)]
    pub phone_numbers: Vec<ClerkPhoneNumber>,
    #[serde(default)]
    pub primary_phone_number_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub last_sign_in_at: Option<i64>,
}

fn is_verified(verification: &Option<ClerkVerification>) -> bool {
    verification.as_ref().is_some_and(|v| v.status == "verified")
}

impl ClerkUserData {
    /// Primary email and whether it is verified, falling back to the first address
    pub fn primary_email(&self) -> Option<(&str, bool)> {
        let primary = self.primary_email_address_id.as_deref();
        self.email_addresses
            .iter()
            .find(|e| Some(e.id.as_str()) == primary)
            .or_else(|| self.email_addresses.first())
            .filter(|e| !e.email_address.is_empty())
            .map(|e| (e.email_address.as_str(), is_verified(&e.verification)))
    }

    /// Primary phone number and whether it is verified
    pub fn primary_phone(&self) -> Option<(&str, bool)> {
        let primary = self.primary_phone_number_id.as_deref()?;
        self.phone_numbers
            .iter()
            .find(|p| p.id == primary)
            .map(|p| (p.phone_number.as_str(), is_verified(&p.verification)))
    }

    pub fn last_sign_in(&self) -> Option<DateTime<Utc>> {
        self.last_sign_in_at.and_then(DateTime::from_timestamp_millis)
    }
}

/// `data` of user.deleted events
#[derive(Debug, Clone, Deserialize)]
struct ClerkDeletedData {
    #[serde(default)]
    id: Option<String>,
}

/// Verify a Svix signature over `{id}.{timestamp}.{body}`.
///
/// `signatures` is the raw `svix-signature` header: space separated
/// `v1,<base64>` entries, any of which may match.
pub fn verify_signature(
    secret: &str,
    msg_id: &str,
    timestamp: &str,
    signatures: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let key = STANDARD
        .decode(secret.strip_prefix("whsec_").unwrap_or(secret))
        .map_err(|_| WebhookError::InvalidSecret)?;

    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| WebhookError::TimestampOutOfRange)?;
    if now.timestamp().abs_diff(ts) > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::TimestampOutOfRange);
    }

    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.trim().as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = STANDARD.encode(mac.finalize().into_bytes());

    let matched = signatures
        .split_whitespace()
        .filter_map(|entry| entry.strip_prefix("v1,"))
        .any(|sig| bool::from(sig.as_bytes().ct_eq(expected.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn verify_request(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), WebhookError> {
    let (Some(id), Some(timestamp), Some(signatures)) = (
        header(headers, "svix-id"),
        header(headers, "svix-timestamp"),
        header(headers, "svix-signature"),
    ) else {
        return Err(WebhookError::MissingHeaders);
    };
    verify_signature(secret, id, timestamp, signatures, body, Utc::now())
}

/// Create webhook routes
pub fn routes(state: WebhookState) -> Router {
    Router::new()
        .route("/v1/webhook/clerk", post(clerk_webhook))
        .with_state(state)
}

/// POST /v1/webhook/clerk - Receive Clerk user events
#[utoipa::path(
    post,
    path = "/v1/webhook/clerk",
    request_body = ClerkWebhookEvent,
    responses(
        (status = 200, description = "Event processed or ignored", body = ApiResponse<MessageResponse>),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Invalid signature")
    ),
    tag = "webhooks"
)]
pub async fn clerk_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<MessageResponse> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        verify_request(secret, &headers, &body).map_err(|e| match e {
            WebhookError::InvalidSecret => {
                tracing::error!("Clerk webhook secret is misconfigured: {}", e);
                ApiError::server(e)
            }
            _ => {
                tracing::warn!("Rejected Clerk webhook: {}", e);
                ApiError::unauthorized("Invalid webhook signature").with_error(e.to_string())
            }
        })?;
    }

    let event: ClerkWebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation("Invalid webhook payload").with_error(e.to_string()))?;
    let event_type = event
        .event_type
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("Missing event type"))?;

    match event_type.as_str() {
        "user.created" | "user.updated" => {
            let data: ClerkUserData = serde_json::from_value(event.data).map_err(|e| {
                ApiError::validation("Invalid user payload").with_error(e.to_string())
            })?;
            let user = state.users.sync_clerk_user(&data).await?;
            tracing::info!(event_type = %event_type, user_id = %user.id, "Clerk user synced");
        }
        "user.deleted" => {
            let data: ClerkDeletedData = serde_json::from_value(event.data).map_err(|e| {
                ApiError::validation("Invalid user payload").with_error(e.to_string())
            })?;
            let clerk_id = data
                .id
                .ok_or_else(|| ApiError::validation("Missing user id"))?;
            if !state.users.delete_clerk_user(&clerk_id).await? {
                tracing::info!(clerk_id = %clerk_id, "Clerk user.deleted for unknown user");
            }
        }
        other => {
            tracing::debug!(event_type = other, "Ignoring Clerk webhook event");
            return Ok(ApiResponse::success(MessageResponse::new("Event ignored")));
        }
    }

    Ok(ApiResponse::success(MessageResponse::new("Webhook processed")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

    fn sign(id: &str, ts: i64, body: &[u8]) -> String {
        let key = STANDARD.decode(SECRET.strip_prefix("whsec_").unwrap()).unwrap();
        let mut mac = HmacSha256::new_from_slice(&key).unwrap();
        mac.update(format!("{}.{}.", id, ts).as_bytes());
        mac.update(body);
        format!("v1,{}", STANDARD.encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_verify_signature_valid() {
        let now = Utc::now();
        let body = br#"{"type":"user.created"}"#;
        let sig = sign("msg_1", now.timestamp(), body);
        let header = format!("v1,bm90LWl0 {}", sig);

        assert_eq!(
            verify_signature(SECRET, "msg_1", &now.timestamp().to_string(), &header, body, now),
            Ok(())
        );
    }

    #[test]
    fn test_verify_signature_tampered_body() {
        let now = Utc::now();
        let sig = sign("msg_1", now.timestamp(), b"original");
        assert_eq!(
            verify_signature(SECRET, "msg_1", &now.timestamp().to_string(), &sig, b"tampered", now),
            Err(WebhookError::InvalidSignature)
        );
    }

    #[test]
    fn test_verify_signature_stale_timestamp() {
        let now = Utc::now();
        let ts = now.timestamp() - SIGNATURE_TOLERANCE_SECS as i64 - 1;
        let sig = sign("msg_1", ts, b"{}");
        assert_eq!(
            verify_signature(SECRET, "msg_1", &ts.to_string(), &sig, b"{}", now),
            Err(WebhookError::TimestampOutOfRange)
        );
    }

    #[test]
    fn test_verify_signature_extreme_timestamps() {
        let now = Utc::now();
        for ts in [i64::MIN, i64::MAX] {
            let sig = sign("msg_1", ts, b"{}");
            assert_eq!(
                verify_signature(SECRET, "msg_1", &ts.to_string(), &sig, b"{}", now),
                Err(WebhookError::TimestampOutOfRange)
            );
        }
    }

    #[test]
    fn test_verify_signature_bad_secret() {
        assert_eq!(
            verify_signature("whsec_***", "id", "0", "v1,x", b"{}", Utc::now()),
            Err(WebhookError::InvalidSecret)
        );
    }

    #[test]
    fn test_clerk_user_primary_contacts() {
        let data: ClerkUserData = serde_json::from_value(serde_json::json!({
            "id": "user_1",
            "email_addresses": [
                { "id": "e1", "email_address": "old@example.com", "verification": { "status": "unverified" } },
                { "id": "e2", "email_address": "new@example.com", "verification": { "status": "verified" } }
            ],
            "primary_email_address_id": "e2",
            "phone_numbers": [
                { "id": "p1", "phone_number": "+15550100", "verification": null }
            ],
            "primary_phone_number_id": "p1",
            "last_sign_in_at": 1700000000000i64
        }))
        .unwrap();

        assert_eq!(data.primary_email(), Some(("new@example.com", true)));
        assert_eq!(data.primary_phone(), Some(("+15550100", false)));
        assert_eq!(data.last_sign_in().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_clerk_user_without_primary_id_uses_first_email() {
        let data = ClerkUserData {
            id: "user_2".to_string(),
            email_addresses: vec![ClerkEmailAddress {
                id: "e1".to_string(),
                email_address: "only@example.com".to_string(),
                verification: None,
            }],
            ..Default::default()
        };
        assert_eq!(data.primary_email(), Some(("only@example.com", false)));
        assert_eq!(data.primary_phone(), None);
    }
}
