use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// FCM HTTP v1 message body, minus the target token (the sender attaches it).
// See: https://firebase.google.com/docs/reference/fcm/rest/v1/projects.messages#Message
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct FcmPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<FcmNotification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,

    // Platform specific overrides (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpush: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct FcmNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// What the caller wants delivered, independent of any recipient platform.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationIntent {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
}

impl NotificationIntent {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        NotificationIntent {
            title: title.into(),
            body: body.into(),
            image_url: None,
        }
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}

/// Per-recipient outcome of a fan-out attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Gateway accepted the message; carries the returned message name.
    Delivered(String),
    /// Gateway rejected the message; carries the error detail.
    Failed(String),
    /// Recipient had no resolvable token and was excluded from both counts.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub target: String,
    pub outcome: DeliveryOutcome,
}

/// Aggregate result of a broadcast, returned once every target was attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub success_count: u32,
    pub failure_count: u32,
}

impl FanoutReport {
    pub fn record(&mut self, result: &DeliveryResult) {
        match result.outcome {
            DeliveryOutcome::Delivered(_) => self.success_count += 1,
            DeliveryOutcome::Failed(_) => self.failure_count += 1,
            DeliveryOutcome::Skipped => {}
        }
    }
}
