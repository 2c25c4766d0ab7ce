use std::time::Duration;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8081";
pub const DEFAULT_MESSAGEBIRD_ENDPOINT: &str = "https://rest.messagebird.com";
pub const DEFAULT_TICK_MS: u64 = 1000;

/// Runtime settings for the relay, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub addr: String,
    pub api_key: Option<String>,
    pub messagebird_key: Option<String>,
    pub messagebird_endpoint: String,
    pub tick: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tick_ms = get("SMS_RELAY_TICK_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_TICK_MS);

        Self {
            addr: get("SMS_RELAY_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            api_key: get("SMS_RELAY_API_KEY"),
            messagebird_key: get("MESSAGEBIRD_ACCESS_KEY"),
            messagebird_endpoint: get("MESSAGEBIRD_ENDPOINT")
                .map(|e| e.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_MESSAGEBIRD_ENDPOINT.to_string()),
            tick: Duration::from_millis(tick_ms),
        }
    }
}

/// Human readable text for each validation rule.
pub mod messages {
    pub const REQUIRED: &str = "must have a value";
    pub const MSISDN: &str = "should be a valid MSISDN";
    pub const ORIGINATOR: &str = "use valid MSISDN or alphanumeric value (max. 11 symbols long)";
    pub const MAX_LENGTH: &str =
        "outreached limit for characters amount (max. 1377 for plain and 603 for unicode)";
}
