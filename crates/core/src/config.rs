use crate::error::{BanditError, BanditResult};
use crate::types::ArmOption;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Root run configuration. Loaded from an optional TOML file and environment
/// variables with the prefix `LINKBANDIT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_options")]
    pub options: Vec<ArmOption>,
    #[serde(default = "default_trials")]
    pub trials: u64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub trial_log: TrialLogConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// How a selected arm's value estimate absorbs a new reward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateRule {
    /// Running arithmetic mean; every observation weighs the same.
    #[default]
    IncrementalMean,
    /// Fixed step size `alpha`; recent observations dominate.
    ExponentialSmoothing { alpha: f64 },
}

impl UpdateRule {
    pub fn validate(&self) -> BanditResult<()> {
        if let UpdateRule::ExponentialSmoothing { alpha } = *self {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(BanditError::invalid_config(format!(
                    "smoothing factor alpha must be in (0, 1], got {alpha}"
                )));
            }
        }
        Ok(())
    }
}

pub fn validate_epsilon(epsilon: f64) -> BanditResult<()> {
    if !(0.0..=1.0).contains(&epsilon) {
        return Err(BanditError::invalid_config(format!(
            "exploration rate epsilon must be in [0, 1], got {epsilon}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default)]
    pub update_rule: UpdateRule,
}

/// Reward source settings. No `endpoint` means simulation mode.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default = "default_reward_field")]
    pub reward_field: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub simulated: SimulatedConfig,
}

impl EnvironmentConfig {
    pub fn is_simulated(&self) -> bool {
        self.endpoint.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedConfig {
    /// Mean reward per unit of channel number.
    #[serde(default = "default_mean_per_unit")]
    pub mean_per_unit: f64,
    /// Standard deviation of the measurement noise.
    #[serde(default = "default_noise_std_dev")]
    pub noise_std_dev: f64,
}

impl SimulatedConfig {
    /// Expected reward for `option`. Channels scale linearly with their
    /// number; routes hash into `[0, 100 × mean_per_unit)`.
    pub fn mean_for(&self, option: &ArmOption) -> f64 {
        match option {
            ArmOption::Channel(ch) => *ch as f64 * self.mean_per_unit,
            ArmOption::Route(route) => {
                let bucket = fnv1a(route) % 10_000;
                bucket as f64 / 100.0 * self.mean_per_unit
            }
        }
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Simulated rewards stay within this many standard deviations of the mean
/// without leaving the finite range.
pub const NOISE_HEADROOM_SIGMAS: f64 = 10.0;

/// Largest accepted trial log batch.
pub const MAX_LOG_BATCH_SIZE: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Csv,
    JsonLines,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrialLogConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReportConfig {
    /// Where to write the JSON run report, if anywhere.
    #[serde(default)]
    pub path: Option<String>,
    /// Log a progress checkpoint every N trials.
    #[serde(default)]
    pub checkpoint_every: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_options() -> Vec<ArmOption> {
    [1, 6, 11, 36, 40, 44, 149, 153, 157]
        .into_iter()
        .map(ArmOption::Channel)
        .collect()
}
fn default_trials() -> u64 {
    1000
}
fn default_epsilon() -> f64 {
    0.1
}
fn default_reward_field() -> String {
    "reward".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_mean_per_unit() -> f64 {
    2.0
}
fn default_noise_std_dev() -> f64 {
    3.0
}
fn default_log_batch_size() -> usize {
    64
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            update_rule: UpdateRule::default(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            source: String::new(),
            destination: String::new(),
            path: Vec::new(),
            reward_field: default_reward_field(),
            retry: RetryConfig::default(),
            simulated: SimulatedConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            mean_per_unit: default_mean_per_unit(),
            noise_std_dev: default_noise_std_dev(),
        }
    }
}

impl Default for TrialLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            format: LogFormat::default(),
            batch_size: default_log_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            options: default_options(),
            trials: default_trials(),
            seed: None,
            policy: PolicyConfig::default(),
            environment: EnvironmentConfig::default(),
            trial_log: TrialLogConfig::default(),
            report: ReportConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file and environment variables.
    pub fn load(file: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("LINKBANDIT")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("options")
                .with_list_parse_key("environment.path"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject anything that would make the run meaningless before a single
    /// trial executes.
    pub fn validate(&self) -> BanditResult<()> {
        validate_options(&self.options)?;
        validate_epsilon(self.policy.epsilon)?;
        self.policy.update_rule.validate()?;

        let env = &self.environment;
        if env.retry.max_attempts == 0 {
            return Err(BanditError::invalid_config(
                "retry.max_attempts must be at least 1",
            ));
        }
        if env.retry.request_timeout_ms == 0 {
            return Err(BanditError::invalid_config(
                "retry.request_timeout_ms must be positive",
            ));
        }
        if let Some(endpoint) = &env.endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                BanditError::invalid_config(format!(
                    "endpoint {endpoint:?} is not a valid URL: {e}"
                ))
            })?;
        }
        if env.reward_field.is_empty() {
            return Err(BanditError::invalid_config("reward_field must not be empty"));
        }
        if !(env.simulated.noise_std_dev.is_finite() && env.simulated.noise_std_dev > 0.0) {
            return Err(BanditError::invalid_config(format!(
                "simulated.noise_std_dev must be positive, got {}",
                env.simulated.noise_std_dev
            )));
        }
        if !env.simulated.mean_per_unit.is_finite() {
            return Err(BanditError::invalid_config(
                "simulated.mean_per_unit must be finite",
            ));
        }
        let headroom = NOISE_HEADROOM_SIGMAS * env.simulated.noise_std_dev;
        for option in &self.options {
            let mean = env.simulated.mean_for(option);
            if !(mean.abs() + headroom).is_finite() {
                return Err(BanditError::invalid_config(format!(
                    "simulated reward for option {option} is out of range"
                )));
            }
        }
        if !(1..=MAX_LOG_BATCH_SIZE).contains(&self.trial_log.batch_size) {
            return Err(BanditError::invalid_config(format!(
                "trial_log.batch_size must be in [1, {MAX_LOG_BATCH_SIZE}], got {}",
                self.trial_log.batch_size
            )));
        }
        if self.report.checkpoint_every == Some(0) {
            return Err(BanditError::invalid_config(
                "report.checkpoint_every must be at least 1",
            ));
        }
        Ok(())
    }
}

/// The option set must be non-empty and its identifiers distinct.
pub fn validate_options(options: &[ArmOption]) -> BanditResult<()> {
    if options.is_empty() {
        return Err(BanditError::invalid_config("option set is empty"));
    }
    let mut seen = HashSet::with_capacity(options.len());
    for option in options {
        if !seen.insert(option) {
            return Err(BanditError::invalid_config(format!(
                "duplicate option {option}"
            )));
        }
    }
    Ok(())
}
