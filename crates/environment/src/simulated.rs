//! Simulated reward source: Gaussian measurement noise around a
//! deterministic per-option mean.

use crate::RewardSource;
use async_trait::async_trait;
use linkbandit_core::config::SimulatedConfig;
use linkbandit_core::{ArmOption, BanditError, BanditResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub struct SimulatedEnvironment {
    config: SimulatedConfig,
    noise: Normal<f64>,
    rng: Mutex<StdRng>,
}

impl SimulatedEnvironment {
    pub fn new(config: SimulatedConfig) -> BanditResult<Self> {
        Self::build(config, StdRng::from_entropy())
    }

    /// Reproducible noise for a given seed.
    pub fn with_seed(config: SimulatedConfig, seed: u64) -> BanditResult<Self> {
        Self::build(config, StdRng::seed_from_u64(seed))
    }

    fn build(config: SimulatedConfig, rng: StdRng) -> BanditResult<Self> {
        if !(config.noise_std_dev.is_finite() && config.noise_std_dev > 0.0) {
            return Err(BanditError::invalid_config(format!(
                "noise std-dev must be positive, got {}",
                config.noise_std_dev
            )));
        }
        let noise = Normal::new(0.0, config.noise_std_dev)
            .map_err(|e| BanditError::invalid_config(format!("noise model: {e}")))?;
        Ok(Self {
            config,
            noise,
            rng: Mutex::new(rng),
        })
    }

    /// Expected reward for `option`.
    pub fn mean_for(&self, option: &ArmOption) -> f64 {
        self.config.mean_for(option)
    }
}

#[async_trait]
impl RewardSource for SimulatedEnvironment {
    async fn get_reward(&self, option: &ArmOption) -> BanditResult<f64> {
        let jitter = self.noise.sample(&mut *self.rng.lock());
        Ok((self.mean_for(option) + jitter).clamp(f64::MIN, f64::MAX))
    }

    fn mode(&self) -> &'static str {
        "simulated"
    }
}
