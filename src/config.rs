use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::bedrock::BedrockProvider;

/// Default number of retries after the first failed call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default ceiling for the exponential term.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(20);

/// Retry timing; these three values fully determine the backoff schedule.
///
/// Durations are written as (fractional) seconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use wilma_llm::config::RetryConfig;
///
/// let config: RetryConfig =
///     serde_json::from_str(r#"{ "max_attempts": 6, "base_delay": 0.5 }"#).unwrap();
/// assert_eq!(config.max_attempts, 6);
/// assert_eq!(config.base_delay, Duration::from_millis(500));
/// assert_eq!(config.max_delay, Duration::from_secs(20));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first call; `0` disables retrying.
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryConfig {
    /// Default timing with a custom retry budget.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Checks `base_delay > 0` and `max_delay >= base_delay`.
    pub fn validate(&self) -> Result<(), LLMError> {
        self.backoff().map(|_| ())
    }

    /// Backoff policy matching this configuration.
    pub fn backoff(&self) -> Result<Backoff, LLMError> {
        Backoff::from_config(self)
    }
}

/// Credential already held by the caller and forwarded on every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Bedrock API key sent as `Authorization: Bearer`.
    Bearer { token: String },
    /// The transport authenticates requests itself, e.g. a signing proxy.
    #[default]
    None,
}

/// Everything needed to build an [`LLMClient`] talking to Bedrock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// AWS region such as `eu-west-2`.
    pub region: String,
    /// Overrides the regional `bedrock-runtime` endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credential: Credential,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Builds a Bedrock-backed [`LLMClient`] from configuration.
///
/// # Errors
///
/// Returns [`LLMError::InvalidConfig`] for a blank region or invalid retry timing.
pub fn build_client_from_config(
    config: &ClientConfig,
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    if config.region.trim().is_empty() {
        return Err(LLMError::InvalidConfig {
            field: "region".to_string(),
            reason: "must not be empty".to_string(),
        });
    }

    let mut provider = BedrockProvider::new(transport, config.region.clone());
    if let Some(endpoint) = &config.endpoint {
        provider = provider.with_endpoint(endpoint.clone());
    }
    if let Credential::Bearer { token } = &config.credential {
        provider = provider.with_bearer_token(token.clone());
    }

    LLMClient::builder(std::sync::Arc::new(provider))
        .retry_config(config.retry)
        .build()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|err| de::Error::custom(format!("invalid duration {secs}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    #[test]
    fn retry_config_defaults_match_documented_values() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn retry_config_validation_rejects_bad_timing() {
        let zero_base = RetryConfig {
            base_delay: Duration::ZERO,
            ..RetryConfig::default()
        };
        assert!(matches!(
            zero_base.validate(),
            Err(LLMError::InvalidConfig { field, .. }) if field == "base_delay"
        ));

        let inverted = RetryConfig {
            base_delay: Duration::from_secs(30),
            ..RetryConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(LLMError::InvalidConfig { field, .. }) if field == "max_delay"
        ));

        let no_retries = RetryConfig::with_max_attempts(0);
        assert!(no_retries.validate().is_ok());
    }

    #[test]
    fn retry_config_rejects_negative_seconds() {
        let result = serde_json::from_str::<RetryConfig>(r#"{ "base_delay": -1.0 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn client_config_deserializes_with_defaults() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "region": "eu-west-2",
            "credential": { "type": "bearer", "token": "secret" },
            "retry": { "max_attempts": 6 }
        }))
        .expect("config");

        assert_eq!(config.region, "eu-west-2");
        assert!(config.endpoint.is_none());
        assert!(matches!(config.credential, Credential::Bearer { ref token } if token == "secret"));
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.max_delay, DEFAULT_MAX_DELAY);
    }

    #[test]
    fn build_client_from_config_validates_inputs() {
        let transport = default_dyn_transport().expect("transport");

        let config = ClientConfig {
            region: "us-east-1".to_string(),
            endpoint: None,
            credential: Credential::None,
            retry: RetryConfig::default(),
        };
        let client = build_client_from_config(&config, transport.clone()).expect("client");
        assert_eq!(client.retry_config().max_attempts, DEFAULT_MAX_ATTEMPTS);

        let blank_region = ClientConfig {
            region: " ".to_string(),
            ..config.clone()
        };
        let err = match build_client_from_config(&blank_region, transport.clone()) {
            Ok(_) => panic!("expected invalid config"),
            Err(err) => err,
        };
        assert!(matches!(err, LLMError::InvalidConfig { ref field, .. } if field == "region"));

        let bad_retry = ClientConfig {
            retry: RetryConfig {
                max_delay: Duration::from_millis(10),
                ..RetryConfig::default()
            },
            ..config
        };
        assert!(build_client_from_config(&bad_retry, transport).is_err());
    }
}
