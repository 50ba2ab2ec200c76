//! Shared configuration defaults and environment variable names.
//!
//! Every crate reads its defaults from here so the broker, topic layout and
//! storage paths are defined in exactly one place.

/// Default values.
pub mod defaults {
    pub const MQTT_HOST: &str = "localhost";
    pub const MQTT_PORT: u16 = 1883;
    pub const MQTT_KEEP_ALIVE_SECS: u64 = 60;
    pub const MQTT_CONNECTION_TIMEOUT_SECS: u64 = 30;
    /// Time allowed for the broker to acknowledge a publish.
    pub const MQTT_PUBLISH_TIMEOUT_SECS: u64 = 10;
    /// Capacity of the request channel between the client handle and its event loop.
    pub const MQTT_CHANNEL_CAPACITY: usize = 10;

    /// Topic prefix in front of the device address, e.g. `home/{device}/sensors-data/#`.
    pub const TOPIC_PREFIX: &str = "home";
    pub const SENSOR_MARKER: &str = "sensors-data";
    pub const ACTUATOR_MARKER: &str = "actuators-data";

    pub const DB_PATH: &str = "data/sensorhub.redb";

    /// Number of entries returned by a "recent history" query.
    pub const RECENT_WINDOW: usize = 30;

    pub const RECONNECT_INITIAL_MS: u64 = 1_000;
    pub const RECONNECT_MAX_MS: u64 = 30_000;

    pub const CONFIG_FILE: &str = "sensorhub.toml";
}

/// Environment variable names.
pub mod env_vars {
    pub const MQTT_HOST: &str = "SENSORHUB_MQTT_HOST";
    pub const MQTT_PORT: &str = "SENSORHUB_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "SENSORHUB_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "SENSORHUB_MQTT_PASSWORD";
    pub const TOPIC_PREFIX: &str = "SENSORHUB_TOPIC_PREFIX";
    pub const DB_PATH: &str = "SENSORHUB_DB_PATH";
    pub const ALERT_MODE: &str = "SENSORHUB_ALERT_MODE";
    pub const LOG_JSON: &str = "SENSORHUB_LOG_JSON";
}

/// Read an environment variable and parse it, ignoring unset or unparsable values.
pub fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Read a non-empty string environment variable.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Normalise a topic prefix: no trailing slash, wildcard characters rejected.
///
/// A leading slash is kept because it is significant in MQTT (`/esp32` and
/// `esp32` are different topic trees).
pub fn normalize_topic_prefix(prefix: &str) -> Result<String, crate::Error> {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.contains('+') || trimmed.contains('#') {
        return Err(crate::config_err!(
            "topic prefix must not contain wildcards: {}",
            prefix
        ));
    }
    Ok(trimmed.to_string())
}
