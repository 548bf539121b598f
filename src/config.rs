//! Connector configuration.

use serde::Deserialize;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

use crate::error::ConfigError;

/// Settings applied to every handshake a `TungsteniteConnector` performs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorConfig {
    /// Value of the `Origin` request header, if any.
    #[serde(default)]
    pub origin: Option<String>,

    /// Extra request headers, sent in order.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl ConnectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: ConnectorConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(origin) = &self.origin {
            HeaderValue::from_str(origin)
                .map_err(|_| ConfigError::Invalid(format!("origin `{origin}` is not a valid header value")))?;
        }
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::Invalid(format!("`{name}` is not a valid header name")))?;
            HeaderValue::from_str(value)
                .map_err(|_| ConfigError::Invalid(format!("header `{name}` has an invalid value")))?;
        }
        Ok(())
    }
}
