//! Runtime configuration.
//!
//! Built once per card session and handed to
//! [`BipService::new`](crate::BipService::new).

use std::time::Duration;

use crate::telephony::ApnType;

/// Tunables for the channel manager and bearer coordinator.
#[derive(Debug, Clone)]
pub struct BipConfig {
    /// Largest buffer size a channel may negotiate.
    pub max_buffer_size: u16,
    /// Bound on TCP connect attempts.
    pub connect_timeout: Duration,
    /// Delay between access-point readiness checks.
    pub apn_retry_interval: Duration,
    /// Readiness checks allowed before an OPEN CHANNEL fails.
    pub apn_retry_limit: u32,
    /// Type tag given to access points inserted for BIP.
    pub bip_apn_type: ApnType,
    /// Only raise events the card armed with SET UP EVENT LIST.
    pub require_event_list: bool,
}

impl Default for BipConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 1500,
            connect_timeout: Duration::from_secs(10),
            apn_retry_interval: Duration::from_millis(200),
            apn_retry_limit: 4,
            bip_apn_type: ApnType::new("bip"),
            require_event_list: true,
        }
    }
}

impl BipConfig {
    /// Build the configuration from environment variables.
    ///
    /// | Variable                        | Default | Description                         |
    /// |---------------------------------|---------|-------------------------------------|
    /// | `STK_BIP_MAX_BUFFER_SIZE`       | `1500`  | Largest negotiated buffer size      |
    /// | `STK_BIP_CONNECT_TIMEOUT_MS`    | `10000` | TCP connect timeout                 |
    /// | `STK_BIP_APN_RETRY_INTERVAL_MS` | `200`   | Delay between APN readiness checks  |
    /// | `STK_BIP_APN_RETRY_LIMIT`       | `4`     | APN readiness checks before failing |
    /// | `STK_BIP_APN_TYPE`              | `bip`   | Type tag for inserted APNs          |
    /// | `STK_BIP_REQUIRE_EVENT_LIST`    | `true`  | Gate events on SET UP EVENT LIST    |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_buffer_size = env_parse("STK_BIP_MAX_BUFFER_SIZE")
            .filter(|size: &u16| *size > 0)
            .unwrap_or(defaults.max_buffer_size);
        let connect_timeout = env_parse("STK_BIP_CONNECT_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.connect_timeout);
        let apn_retry_interval = env_parse("STK_BIP_APN_RETRY_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.apn_retry_interval);
        let apn_retry_limit = env_parse("STK_BIP_APN_RETRY_LIMIT").unwrap_or(defaults.apn_retry_limit);
        let bip_apn_type = std::env::var("STK_BIP_APN_TYPE")
            .ok()
            .filter(|v| !v.is_empty())
            .map_or(defaults.bip_apn_type, ApnType::from);
        let require_event_list =
            env_parse("STK_BIP_REQUIRE_EVENT_LIST").unwrap_or(defaults.require_event_list);

        Self {
            max_buffer_size,
            connect_timeout,
            apn_retry_interval,
            apn_retry_limit,
            bip_apn_type,
            require_event_list,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
