use crate::{
    config::Settings,
    dispatcher::Dispatcher,
    error::Result,
    fcm_sender::FcmClient,
    token_store::{self, RedisTokenSource, TokenSource},
};
use std::{env, sync::Arc};

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Production wiring: Redis-backed token source plus the HTTP v1 FCM
    /// client. Fails fast when credentials or the datastore are unavailable.
    pub async fn new(settings: Settings) -> Result<Self> {
        // Determine Redis URL: prioritize REDIS_URL env var over settings
        let redis_url = match env::var("REDIS_URL") {
            Ok(url_from_env) => {
                tracing::info!("Using Redis URL from REDIS_URL environment variable");
                url_from_env
            }
            Err(_) => settings.redis.url.clone(),
        };

        let redis_pool =
            token_store::create_pool(&redis_url, settings.redis.connection_pool_size).await?;
        let token_source: Arc<dyn TokenSource> = Arc::new(RedisTokenSource::new(redis_pool));

        let fcm_client = Arc::new(FcmClient::new(&settings.fcm)?);
        tracing::info!("FCM client initialized");

        Ok(Self::with_components(settings, token_source, fcm_client))
    }

    /// Wiring with injected collaborators, used by tests with the in-memory
    /// token source and mock sender.
    pub fn with_components(
        settings: Settings,
        token_source: Arc<dyn TokenSource>,
        fcm_client: Arc<FcmClient>,
    ) -> Self {
        let dispatcher = Dispatcher::new(token_source, fcm_client, &settings.delivery);
        AppState {
            settings,
            dispatcher,
        }
    }
}
