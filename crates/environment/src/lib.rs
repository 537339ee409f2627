//! Reward sources: where a selected option's reward comes from. Either a
//! seeded noise model or a remote measurement service behind bounded retries
//! with exponential backoff.

pub mod remote;
pub mod retry;
pub mod simulated;

pub use remote::{MeasurementRequest, RemoteEnvironment};
pub use retry::{retry_with_backoff, RetryExhausted, RetryPolicy};
pub use simulated::SimulatedEnvironment;

use async_trait::async_trait;
use linkbandit_core::config::EnvironmentConfig;
use linkbandit_core::{ArmOption, BanditResult};
use tracing::info;

/// Given a selected option, produce its reward or fail.
///
/// The only error an implementation may surface is
/// `BanditError::RewardUnavailable`; transport details stay inside.
#[async_trait]
pub trait RewardSource: Send + Sync {
    async fn get_reward(&self, option: &ArmOption) -> BanditResult<f64>;

    /// Short mode name for logs.
    fn mode(&self) -> &'static str;
}

/// Build the reward source the configuration asks for: remote when an
/// endpoint is set, simulated otherwise.
pub fn build_reward_source(
    config: &EnvironmentConfig,
    seed: Option<u64>,
) -> BanditResult<Box<dyn RewardSource>> {
    let source: Box<dyn RewardSource> = match &config.endpoint {
        Some(_) => Box::new(RemoteEnvironment::new(config)?),
        None => {
            let sim = match seed {
                Some(seed) => SimulatedEnvironment::with_seed(config.simulated.clone(), seed)?,
                None => SimulatedEnvironment::new(config.simulated.clone())?,
            };
            Box::new(sim)
        }
    };
    info!(mode = source.mode(), "reward source ready");
    Ok(source)
}
