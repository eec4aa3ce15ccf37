//! Builds FCM message payloads from a notification intent and a target token.
//!
//! Building is a pure function of its inputs. When the intent carries an
//! image, all three platform override slots are populated at once: the
//! builder cannot know the recipient's platform, and the gateway ignores
//! hints irrelevant to the actual device.

use crate::models::{FcmNotification, FcmPayload, NotificationIntent};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Device token is empty or invalid")]
    InvalidToken,
}

/// Intent for the single-target delivery notification.
pub fn delivery_intent(coupon_name: &str) -> NotificationIntent {
    NotificationIntent::new(
        "Out for Delivery",
        format!("{coupon_name} is on the way to deliver Your Order."),
    )
}

/// Intent for the broadcast coupon offer.
pub fn special_offer_intent(coupon_name: &str) -> NotificationIntent {
    NotificationIntent::new(
        "Special Offer",
        format!("Hello! Here's a special coupon just for you: {coupon_name}"),
    )
}

/// Builds the message for `token`. Token validity is the gateway's business,
/// but a blank token is rejected here rather than wasting a network round trip.
pub fn build(intent: &NotificationIntent, token: &str) -> Result<FcmPayload, PayloadError> {
    if token.trim().is_empty() {
        return Err(PayloadError::InvalidToken);
    }

    let mut payload = FcmPayload {
        notification: Some(FcmNotification {
            title: Some(intent.title.clone()),
            body: Some(intent.body.clone()),
        }),
        ..FcmPayload::default()
    };

    if let Some(image_url) = &intent.image_url {
        let (android, webpush, apns) = image_overrides(image_url);
        payload.android = Some(android);
        payload.webpush = Some(webpush);
        payload.apns = Some(apns);
    }

    Ok(payload)
}

/// Encodes the single image directive into the per-platform wire fields.
fn image_overrides(
    image_url: &str,
) -> (serde_json::Value, serde_json::Value, serde_json::Value) {
    let android = json!({
        "notification": { "image": image_url }
    });
    let webpush = json!({
        "headers": { "image": image_url }
    });
    // mutable-content lets the iOS notification extension attach the image.
    let apns = json!({
        "payload": {
            "aps": { "mutable-content": 1 }
        },
        "fcm_options": { "image": image_url }
    });
    (android, webpush, apns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_payload_has_no_platform_overrides() {
        let intent = special_offer_intent("SAVE20");
        let payload = build(&intent, "device-token-1").unwrap();

        let notification = payload.notification.unwrap();
        assert_eq!(notification.title.as_deref(), Some("Special Offer"));
        assert_eq!(
            notification.body.as_deref(),
            Some("Hello! Here's a special coupon just for you: SAVE20")
        );
        assert!(payload.android.is_none());
        assert!(payload.webpush.is_none());
        assert!(payload.apns.is_none());
    }

    #[test]
    fn rich_payload_populates_all_three_platform_slots() {
        let intent = NotificationIntent::new("Weekend deal", "Fresh drops inside")
            .with_image("https://cdn.example.com/banner.png");
        let payload = build(&intent, "device-token-1").unwrap();

        let android = payload.android.expect("android override");
        assert_eq!(
            android["notification"]["image"],
            "https://cdn.example.com/banner.png"
        );

        let webpush = payload.webpush.expect("webpush override");
        assert_eq!(
            webpush["headers"]["image"],
            "https://cdn.example.com/banner.png"
        );

        let apns = payload.apns.expect("apns override");
        assert_eq!(apns["payload"]["aps"]["mutable-content"], 1);
        assert_eq!(
            apns["fcm_options"]["image"],
            "https://cdn.example.com/banner.png"
        );
    }

    #[test]
    fn empty_token_is_rejected() {
        let intent = delivery_intent("SAVE20");
        assert_eq!(build(&intent, "").unwrap_err(), PayloadError::InvalidToken);
        assert_eq!(
            build(&intent, "   ").unwrap_err(),
            PayloadError::InvalidToken
        );
    }

    #[test]
    fn delivery_intent_mentions_the_coupon() {
        let intent = delivery_intent("FREESHIP");
        assert_eq!(intent.title, "Out for Delivery");
        assert_eq!(intent.body, "FREESHIP is on the way to deliver Your Order.");
        assert!(intent.image_url.is_none());
    }
}
