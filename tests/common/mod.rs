// Shared builders for integration tests.

use coupon_push_service::config::{
    DeliverySettings, FcmSettings, RedisSettings, ServerSettings, Settings,
};
use coupon_push_service::fcm_sender::{FcmClient, MockFcmSender};
use coupon_push_service::state::AppState;
use coupon_push_service::token_store::MemoryTokenSource;
use std::sync::Arc;
use std::time::Duration;

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        redis: RedisSettings {
            url: "redis://127.0.0.1:6379".to_string(),
            connection_pool_size: 4,
        },
        fcm: FcmSettings {
            project_id: "test-project".to_string(),
            endpoint: "https://fcm.googleapis.com".to_string(),
            credentials_path: None,
            send_timeout_secs: 5,
        },
        delivery: DeliverySettings::default(),
    }
}

/// App state wired to the in-memory token source and the recording sender.
pub fn test_state(source: &MemoryTokenSource, sender: &MockFcmSender) -> Arc<AppState> {
    let fcm_client = FcmClient::new_with_impl(Box::new(sender.clone()), Duration::from_secs(5));
    Arc::new(AppState::with_components(
        test_settings(),
        Arc::new(source.clone()),
        Arc::new(fcm_client),
    ))
}
