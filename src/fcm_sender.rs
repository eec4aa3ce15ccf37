//! Outbound FCM delivery. One send attempt per call, no retry; failure
//! handling and tallying belong to the dispatcher.

use crate::config::FcmSettings;
use crate::models::FcmPayload;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

const CREDENTIALS_BASE64_ENV: &str = "COUPON_PUSH__FCM__CREDENTIALS_BASE64";
const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

// Refresh the cached access token this long before it actually expires.
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Error, Debug, Clone)]
pub enum FcmError {
    #[error("Initialization error: {0}")]
    Initialization(String),
    #[error("OAuth token error: {0}")]
    Auth(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("FCM indicated token is not registered or invalid")]
    TokenNotRegistered,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Send timed out")]
    Timeout,
    #[error("Unknown FCM error: code={code}, hint={hint:?}")]
    Unknown { code: u16, hint: Option<String> },
}

/// The fields of a Google service account key this service needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    pub token_uri: String,
}

#[derive(Serialize)]
struct OauthClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

// Define the trait for sending FCM messages
#[async_trait]
pub trait FcmSend: Send + Sync {
    /// Sends one message; returns the gateway receipt (the message name).
    async fn send_single(
        &self,
        token: &str,
        payload: FcmPayload,
    ) -> std::result::Result<String, FcmError>;
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Real sender targeting the FCM HTTP v1 API with OAuth2 JWT-bearer auth.
struct HttpV1Sender {
    http: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    project_id: String,
    endpoint: String,
    cached_token: RwLock<Option<CachedToken>>,
}

impl HttpV1Sender {
    fn new(settings: &FcmSettings) -> Result<Self, FcmError> {
        let raw_key = load_credentials(settings)?;
        let key: ServiceAccountKey = serde_json::from_slice(&raw_key).map_err(|e| {
            FcmError::Initialization(format!("Invalid service account JSON: {e}"))
        })?;

        let project_id = if !settings.project_id.is_empty() {
            settings.project_id.clone()
        } else {
            key.project_id.clone().ok_or_else(|| {
                FcmError::Initialization(
                    "No FCM project id in settings or service account key".to_string(),
                )
            })?
        };

        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| FcmError::Initialization(format!("Invalid private key: {e}")))?;

        Ok(HttpV1Sender {
            http: reqwest::Client::new(),
            key,
            encoding_key,
            project_id,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            cached_token: RwLock::new(None),
        })
    }

    /// Returns a bearer token, minting a fresh one when the cache is empty
    /// or close to expiry.
    async fn access_token(&self) -> Result<String, FcmError> {
        let now = Utc::now();
        if let Some(cached) = self.cached_token.read().await.as_ref() {
            if cached.expires_at - now > ChronoDuration::seconds(TOKEN_EXPIRY_SKEW_SECS) {
                return Ok(cached.access_token.clone());
            }
        }

        let mut guard = self.cached_token.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at - now > ChronoDuration::seconds(TOKEN_EXPIRY_SKEW_SECS) {
                return Ok(cached.access_token.clone());
            }
        }

        let claims = OauthClaims {
            iss: &self.key.client_email,
            scope: FCM_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: (now + ChronoDuration::hours(1)).timestamp(),
        };
        let assertion = jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )
        .map_err(|e| FcmError::Auth(format!("Failed to sign JWT: {e}")))?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FcmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FcmError::Unauthorized(format!(
                "Token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| FcmError::Auth(format!("Invalid token response: {e}")))?;

        let expires_at =
            now + ChronoDuration::seconds(token.expires_in.min(i64::MAX as u64) as i64);
        let access_token = token.access_token.clone();
        *guard = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });

        Ok(access_token)
    }
}

#[async_trait]
impl FcmSend for HttpV1Sender {
    async fn send_single(
        &self,
        token: &str,
        payload: FcmPayload,
    ) -> std::result::Result<String, FcmError> {
        let bearer = self.access_token().await?;

        let mut message = serde_json::to_value(&payload)
            .map_err(|e| FcmError::InvalidRequest(format!("Unserializable payload: {e}")))?;
        message["token"] = serde_json::Value::String(token.to_string());
        let body = serde_json::json!({ "message": message });

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint, self.project_id
        );

        tracing::debug!(
            token_prefix = &token[..token.len().min(8)],
            "Sending FCM v1 request"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| FcmError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let value: serde_json::Value = response
                .json()
                .await
                .map_err(|e| FcmError::Transport(format!("Invalid send response: {e}")))?;
            let receipt = value["name"].as_str().unwrap_or_default().to_string();
            tracing::debug!(
                token_prefix = &token[..token.len().min(8)],
                receipt = %receipt,
                "FCM send successful"
            );
            return Ok(receipt);
        }

        let detail = response.text().await.unwrap_or_default();
        let error = classify_gateway_error(status.as_u16(), &detail);
        tracing::warn!(
            token_prefix = &token[..token.len().min(8)],
            code = status.as_u16(),
            error = %error,
            "FCM send failed"
        );
        Err(error)
    }
}

fn classify_gateway_error(code: u16, detail: &str) -> FcmError {
    let lowered = detail.to_lowercase();
    if lowered.contains("unregistered")
        || lowered.contains("not registered")
        || lowered.contains("invalid registration token")
        || lowered.contains("baddevicetoken")
    {
        return FcmError::TokenNotRegistered;
    }
    match code {
        400 => FcmError::InvalidRequest(detail.to_string()),
        401 | 403 => FcmError::Unauthorized(detail.to_string()),
        404 => FcmError::TokenNotRegistered,
        _ => FcmError::Unknown {
            code,
            hint: if detail.is_empty() {
                None
            } else {
                Some(detail.to_string())
            },
        },
    }
}

fn load_credentials(settings: &FcmSettings) -> Result<Vec<u8>, FcmError> {
    if let Ok(credentials_base64) = std::env::var(CREDENTIALS_BASE64_ENV) {
        if !credentials_base64.is_empty() {
            return base64::engine::general_purpose::STANDARD
                .decode(credentials_base64.trim())
                .map_err(|e| {
                    FcmError::Initialization(format!("Failed to decode base64 credentials: {e}"))
                });
        }
    }
    if let Some(path) = &settings.credentials_path {
        return std::fs::read(path).map_err(|e| {
            FcmError::Initialization(format!("Failed to read credentials file {path}: {e}"))
        });
    }
    Err(FcmError::Initialization(
        "FCM service account credentials are missing".to_string(),
    ))
}

/// Facade over the configured sender. Applies the per-send timeout so no
/// single gateway call can stall a fan-out indefinitely.
pub struct FcmClient {
    client: Box<dyn FcmSend>,
    send_timeout: Duration,
}

impl FcmClient {
    pub fn new(settings: &FcmSettings) -> Result<Self, FcmError> {
        let sender = HttpV1Sender::new(settings)?;
        Ok(FcmClient {
            client: Box::new(sender),
            send_timeout: Duration::from_secs(settings.send_timeout_secs),
        })
    }

    /// Constructor for injecting a mock/custom implementation (for testing).
    pub fn new_with_impl(client_impl: Box<dyn FcmSend>, send_timeout: Duration) -> Self {
        FcmClient {
            client: client_impl,
            send_timeout,
        }
    }

    /// Sends a payload to a single device token.
    pub async fn send_single(
        &self,
        token: &str,
        payload: FcmPayload,
    ) -> std::result::Result<String, FcmError> {
        match tokio::time::timeout(self.send_timeout, self.client.send_single(token, payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FcmError::Timeout),
        }
    }
}

/// In-memory sender recording every send, with per-token error simulation.
#[derive(Clone, Default)]
pub struct MockFcmSender {
    sent_messages: Arc<Mutex<Vec<(String, FcmPayload)>>>,
    error_tokens: Arc<Mutex<HashMap<String, FcmError>>>,
}

impl MockFcmSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_sent_messages(&self) -> Vec<(String, FcmPayload)> {
        self.sent_messages.lock().unwrap().clone()
    }

    pub fn set_error_for_token(&self, token: &str, error: FcmError) {
        self.error_tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), error);
    }

    pub fn clear(&self) {
        self.sent_messages.lock().unwrap().clear();
        self.error_tokens.lock().unwrap().clear();
    }
}

#[async_trait]
impl FcmSend for MockFcmSender {
    async fn send_single(
        &self,
        token: &str,
        payload: FcmPayload,
    ) -> std::result::Result<String, FcmError> {
        if let Some(error) = self.error_tokens.lock().unwrap().get(token) {
            return Err(error.clone());
        }

        let mut messages = self.sent_messages.lock().unwrap();
        messages.push((token.to_string(), payload));
        Ok(format!("projects/mock/messages/{}", messages.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FcmNotification, FcmPayload};

    fn test_payload(title: &str) -> FcmPayload {
        FcmPayload {
            notification: Some(FcmNotification {
                title: Some(title.to_string()),
                body: Some("Test Body".to_string()),
            }),
            ..FcmPayload::default()
        }
    }

    #[tokio::test]
    async fn mock_sender_records_single_send() {
        let mock_sender = MockFcmSender::new();
        let fcm_client =
            FcmClient::new_with_impl(Box::new(mock_sender.clone()), Duration::from_secs(5));

        let payload = test_payload("Test Title");
        let receipt = fcm_client
            .send_single("test_token_1", payload.clone())
            .await
            .unwrap();
        assert!(receipt.starts_with("projects/mock/messages/"));

        let sent = mock_sender.get_sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "test_token_1");
        assert_eq!(sent[0].1, payload);
    }

    #[tokio::test]
    async fn mock_sender_simulates_errors() {
        let mock_sender = MockFcmSender::new();
        let fcm_client =
            FcmClient::new_with_impl(Box::new(mock_sender.clone()), Duration::from_secs(5));

        mock_sender.set_error_for_token("bad_token", FcmError::TokenNotRegistered);

        let result = fcm_client
            .send_single("bad_token", test_payload("Error Test"))
            .await;
        assert!(matches!(result, Err(FcmError::TokenNotRegistered)));
        assert!(mock_sender.get_sent_messages().is_empty());
    }

    struct SlowSender;

    #[async_trait]
    impl FcmSend for SlowSender {
        async fn send_single(
            &self,
            _token: &str,
            _payload: FcmPayload,
        ) -> std::result::Result<String, FcmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("unreachable".to_string())
        }
    }

    #[tokio::test]
    async fn send_times_out() {
        let fcm_client =
            FcmClient::new_with_impl(Box::new(SlowSender), Duration::from_millis(50));
        let result = fcm_client
            .send_single("token", test_payload("Slow"))
            .await;
        assert!(matches!(result, Err(FcmError::Timeout)));
    }

    #[test]
    fn gateway_errors_classify_unregistered_tokens() {
        assert!(matches!(
            classify_gateway_error(400, "Requested entity was not found. UNREGISTERED"),
            FcmError::TokenNotRegistered
        ));
        assert!(matches!(
            classify_gateway_error(404, ""),
            FcmError::TokenNotRegistered
        ));
        assert!(matches!(
            classify_gateway_error(400, "Invalid JSON payload"),
            FcmError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_gateway_error(503, "backend unavailable"),
            FcmError::Unknown { code: 503, .. }
        ));
    }
}
