//! Remote reward source: asks a measurement service to run a throughput
//! test for the selected option and reads the reward out of its JSON reply.

use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::RewardSource;
use async_trait::async_trait;
use linkbandit_core::config::EnvironmentConfig;
use linkbandit_core::{ArmOption, BanditError, BanditResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Body of a measurement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRequest {
    pub source: String,
    pub destination: String,
    /// Intermediate hops; empty for a direct link.
    pub path: Vec<String>,
    pub option: ArmOption,
}

/// Why a single attempt did not yield a reward.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("measurement service returned {0}")]
    Status(StatusCode),

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("response has no numeric `{0}` field")]
    MissingReward(String),

    #[error("reward field `{0}` is not finite")]
    NonFinite(String),
}

pub struct RemoteEnvironment {
    client: reqwest::Client,
    endpoint: String,
    source: String,
    destination: String,
    path: Vec<String>,
    reward_field: String,
    retry: RetryPolicy,
}

impl RemoteEnvironment {
    pub fn new(config: &EnvironmentConfig) -> BanditResult<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| BanditError::invalid_config("remote mode needs an endpoint"))?;
        let retry = RetryPolicy::from(&config.retry);
        if retry.max_attempts == 0 {
            return Err(BanditError::invalid_config(
                "retry.max_attempts must be at least 1",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(retry.request_timeout())
            .build()
            .map_err(|e| BanditError::invalid_config(format!("http client: {e}")))?;

        info!(
            endpoint = %endpoint,
            max_attempts = retry.max_attempts,
            base_delay_ms = retry.base_delay_ms,
            timeout_ms = retry.request_timeout_ms,
            "remote measurement client initialised"
        );

        Ok(Self {
            client,
            endpoint,
            source: config.source.clone(),
            destination: config.destination.clone(),
            path: config.path.clone(),
            reward_field: config.reward_field.clone(),
            retry,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request_for(&self, option: &ArmOption) -> MeasurementRequest {
        MeasurementRequest {
            source: self.source.clone(),
            destination: self.destination.clone(),
            path: self.path.clone(),
            option: option.clone(),
        }
    }

    async fn measure_once(&self, request: &MeasurementRequest) -> Result<f64, AttemptError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AttemptError::MalformedBody(e.to_string()))?;
        extract_reward(&body, &self.reward_field)
    }
}

/// Pull a finite number out of `body[field]`. Anything else is a failed
/// attempt, never a zero reward.
pub fn extract_reward(body: &serde_json::Value, field: &str) -> Result<f64, AttemptError> {
    let value = body
        .get(field)
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| AttemptError::MissingReward(field.to_string()))?;
    if !value.is_finite() {
        return Err(AttemptError::NonFinite(field.to_string()));
    }
    Ok(value)
}

#[async_trait]
impl RewardSource for RemoteEnvironment {
    async fn get_reward(&self, option: &ArmOption) -> BanditResult<f64> {
        let request = self.request_for(option);

        match retry_with_backoff(&self.retry, |_| self.measure_once(&request)).await {
            Ok(reward) => {
                debug!(option = %option, reward, "measurement received");
                Ok(reward)
            }
            Err(exhausted) => {
                metrics::counter!("reward.unavailable").increment(1);
                warn!(
                    option = %option,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "measurement unavailable"
                );
                Err(BanditError::RewardUnavailable {
                    option: option.label(),
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error.to_string(),
                })
            }
        }
    }

    fn mode(&self) -> &'static str {
        "remote"
    }
}
