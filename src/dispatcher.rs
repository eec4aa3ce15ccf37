//! Fan-out delivery engine.
//!
//! Broadcasts run as independent per-recipient tasks over a bounded
//! concurrent stream. Each task converts its own failure into a
//! `DeliveryResult` value, so one stale token can never abort delivery to
//! the remaining recipients; the results are reduced into a `FanoutReport`.

use crate::config::{DeliverySettings, TokenPolicy};
use crate::error::{Result, ServiceError};
use crate::fcm_sender::FcmClient;
use crate::models::{DeliveryOutcome, DeliveryResult, FanoutReport, NotificationIntent};
use crate::payload;
use crate::token_store::TokenSource;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    token_source: Arc<dyn TokenSource>,
    fcm_client: Arc<FcmClient>,
    token_policy: TokenPolicy,
    fanout_concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        token_source: Arc<dyn TokenSource>,
        fcm_client: Arc<FcmClient>,
        delivery: &DeliverySettings,
    ) -> Self {
        Dispatcher {
            token_source,
            fcm_client,
            token_policy: delivery.token_policy,
            fanout_concurrency: delivery.fanout_concurrency.max(1),
        }
    }

    /// Single-target delivery. There is no fan-out here, so a missing user or
    /// token is fatal to the request rather than a tally entry.
    pub async fn send_to_user(&self, user_ref: &str, coupon_name: &str) -> Result<String> {
        if !self.token_source.user_exists(user_ref).await? {
            return Err(ServiceError::NotFound("User not found".to_string()));
        }

        let tokens = self.token_source.tokens_for_user(user_ref).await?;
        let Some(token) = tokens.first() else {
            return Err(ServiceError::NotFound(
                "No device tokens found for user".to_string(),
            ));
        };
        if token.trim().is_empty() {
            return Err(ServiceError::NotFound(
                "Device token not found or invalid".to_string(),
            ));
        }

        let intent = payload::delivery_intent(coupon_name);
        let message = payload::build(&intent, token)?;
        let receipt = self.fcm_client.send_single(token, message).await?;

        info!(user_ref, receipt = %receipt, "Delivery notification sent");
        Ok(receipt)
    }

    /// Best-effort broadcast to every known user. The only fatal path is a
    /// completely empty user set; individual send failures are tallied.
    pub async fn broadcast(&self, intent: NotificationIntent) -> Result<FanoutReport> {
        let user_refs = self.token_source.all_user_refs().await?;
        if user_refs.is_empty() {
            return Err(ServiceError::NotFound("No users found".to_string()));
        }

        let total = user_refs.len();
        debug!(total, "Starting broadcast fan-out");

        let report = stream::iter(user_refs)
            .map(|user_ref| {
                let intent = intent.clone();
                async move { self.deliver_to_target(user_ref, intent).await }
            })
            .buffer_unordered(self.fanout_concurrency)
            .fold(FanoutReport::default(), |mut report, result| async move {
                report.record(&result);
                report
            })
            .await;

        info!(
            total,
            success = report.success_count,
            failure = report.failure_count,
            "Broadcast completed"
        );
        Ok(report)
    }

    /// One fan-out task. Never returns an error: failures become part of the
    /// per-recipient result so the surrounding stream keeps going.
    async fn deliver_to_target(
        &self,
        user_ref: String,
        intent: NotificationIntent,
    ) -> DeliveryResult {
        let outcome = match self.try_deliver(&user_ref, &intent).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(user_ref = %user_ref, error = %e, "Failed to deliver broadcast notification");
                DeliveryOutcome::Failed(e.to_string())
            }
        };
        DeliveryResult {
            target: user_ref,
            outcome,
        }
    }

    async fn try_deliver(
        &self,
        user_ref: &str,
        intent: &NotificationIntent,
    ) -> Result<DeliveryOutcome> {
        let tokens = self.token_source.tokens_for_user(user_ref).await?;
        let usable: Vec<&str> = tokens
            .iter()
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
            .collect();

        if usable.is_empty() {
            debug!(user_ref, "No registered tokens, skipping");
            return Ok(DeliveryOutcome::Skipped);
        }

        let selected = match self.token_policy {
            TokenPolicy::First => &usable[..1],
            TokenPolicy::All => &usable[..],
        };

        let mut delivered = None;
        let mut last_error = None;
        for &token in selected {
            let message = payload::build(intent, token)?;
            match self.fcm_client.send_single(token, message).await {
                Ok(receipt) => {
                    delivered = Some(receipt);
                }
                Err(e) => {
                    warn!(
                        user_ref,
                        token_prefix = &token[..token.len().min(8)],
                        error = %e,
                        "FCM send failed for token"
                    );
                    last_error = Some(e);
                }
            }
        }

        // Under the `all` policy a user counts as delivered when at least one
        // of their devices accepted the message.
        match (delivered, last_error) {
            (Some(receipt), _) => Ok(DeliveryOutcome::Delivered(receipt)),
            (None, Some(error)) => Ok(DeliveryOutcome::Failed(error.to_string())),
            (None, None) => Ok(DeliveryOutcome::Skipped),
        }
    }
}
