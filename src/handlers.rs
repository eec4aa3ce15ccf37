//! HTTP surface: thin request parsing and validation over the dispatcher.

use crate::error::{Result, ServiceError};
use crate::models::{FanoutReport, NotificationIntent};
use crate::payload;
use crate::state::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

// Overall request deadline; individual gateway sends have their own timeout.
const REQUEST_DEADLINE: Duration = Duration::from_secs(60);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/send-notification", post(send_notification))
        .route("/send-common-notification", post(send_common_notification))
        .route("/send-notification-to-all", post(send_notification_to_all))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_DEADLINE))
        .with_state(state)
}

async fn root() -> &'static str {
    "Server is running!"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    pub user_reference: Option<String>,
    pub coupon_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendNotificationResponse {
    pub message: String,
    pub response: String,
}

async fn send_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendNotificationRequest>,
) -> Result<Json<SendNotificationResponse>> {
    let (Some(user_reference), Some(coupon_name)) = (
        present(request.user_reference),
        present(request.coupon_name),
    ) else {
        return Err(ServiceError::Validation(
            "Missing userReference or couponName".to_string(),
        ));
    };

    let receipt = state
        .dispatcher
        .send_to_user(&user_reference, &coupon_name)
        .await?;

    Ok(Json(SendNotificationResponse {
        message: "Notification sent successfully".to_string(),
        response: receipt,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonNotificationRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutResponse {
    pub message: String,
    pub success_count: u32,
    pub failure_count: u32,
}

impl FanoutResponse {
    fn from_report(report: FanoutReport) -> Self {
        FanoutResponse {
            message: "Notifications sent".to_string(),
            success_count: report.success_count,
            failure_count: report.failure_count,
        }
    }
}

async fn send_common_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommonNotificationRequest>,
) -> Result<Json<FanoutResponse>> {
    let (Some(title), Some(description), Some(image_url)) = (
        present(request.title),
        present(request.description),
        present(request.image_url),
    ) else {
        return Err(ServiceError::Validation(
            "Missing title, description or imageUrl".to_string(),
        ));
    };

    let intent = NotificationIntent::new(title, description).with_image(image_url);
    let report = state.dispatcher.broadcast(intent).await?;
    Ok(Json(FanoutResponse::from_report(report)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastCouponRequest {
    pub coupon_name: Option<String>,
}

async fn send_notification_to_all(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BroadcastCouponRequest>,
) -> Result<Json<FanoutResponse>> {
    let Some(coupon_name) = present(request.coupon_name) else {
        return Err(ServiceError::Validation("Missing couponName".to_string()));
    };

    let intent = payload::special_offer_intent(&coupon_name);
    let report = state.dispatcher.broadcast(intent).await?;
    Ok(Json(FanoutResponse::from_report(report)))
}

/// Treats absent and empty-string fields the same way.
fn present(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}
