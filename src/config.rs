use serde::Deserialize;

pub use config::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_server_settings")]
    pub server: ServerSettings,
    pub redis: RedisSettings,
    pub fcm: FcmSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisSettings {
    pub url: String, // Loaded via env var typically
    pub connection_pool_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FcmSettings {
    /// Firebase project id. May be left empty, in which case the id embedded
    /// in the service account key is used.
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_fcm_endpoint")]
    pub endpoint: String,
    /// Path to a service account JSON file. The base64 form in
    /// `COUPON_PUSH__FCM__CREDENTIALS_BASE64` takes precedence.
    pub credentials_path: Option<String>,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliverySettings {
    #[serde(default)]
    pub token_policy: TokenPolicy,
    #[serde(default = "default_fanout_concurrency")]
    pub fanout_concurrency: usize,
}

/// How many of a user's registered device tokens receive a broadcast.
/// The upstream data model allows several tokens per user; `First` matches
/// the historical single-active-device behavior.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenPolicy {
    #[default]
    First,
    All,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        DeliverySettings {
            token_policy: TokenPolicy::default(),
            fanout_concurrency: default_fanout_concurrency(),
        }
    }
}

fn default_server_settings() -> ServerSettings {
    ServerSettings {
        listen_addr: default_listen_addr(),
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_fcm_endpoint() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_fanout_concurrency() -> usize {
    8
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(format!("Failed to get current dir: {e}")))?;
        let config_path = config_dir.join("config").join("settings.yaml");

        let s = config::Config::builder()
            .add_source(config::File::from(config_path).required(true))
            // E.g. `COUPON_PUSH__REDIS__URL=redis://...` overrides `redis.url`
            .add_source(config::Environment::with_prefix("COUPON_PUSH").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_settings_default_to_first_token() {
        let settings = DeliverySettings::default();
        assert_eq!(settings.token_policy, TokenPolicy::First);
        assert_eq!(settings.fanout_concurrency, 8);
    }

    #[test]
    fn token_policy_parses_lowercase() {
        let policy: TokenPolicy = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(policy, TokenPolicy::All);
    }
}
