//! Client connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for one connection to a renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Renderer endpoint, e.g. `http://127.0.0.1:51022`.
    pub endpoint: String,
    /// How long to wait for the connection to be established.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Deadline applied to unary calls that do not bring their own.
    /// `None` leaves calls bounded only by the transport.
    #[serde(with = "opt_millis")]
    pub default_deadline: Option<Duration>,
    /// Name the renderer logs for this client's event stream.
    pub client_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:51022".to_string(),
            connect_timeout: Duration::from_secs(5),
            default_deadline: None,
            client_name: "renderlink".to_string(),
        }
    }
}

impl ClientConfig {
    /// Config for the given endpoint with default settings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the default per-call deadline.
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    /// Set the client name.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"endpoint": "http://[::1]:7000", "default_deadline": 250}"#)
                .unwrap();
        assert_eq!(config.endpoint, "http://[::1]:7000");
        assert_eq!(config.default_deadline, Some(Duration::from_millis(250)));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.client_name, "renderlink");
    }

    #[test]
    fn serializes_durations_as_millis() {
        let config = ClientConfig::new("http://localhost:1")
            .with_connect_timeout(Duration::from_millis(1500))
            .with_client_name("plugin");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["connect_timeout"], 1500);
        assert!(json["default_deadline"].is_null());

        let back: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
