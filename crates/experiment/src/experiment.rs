//! A single experiment run: N strictly sequential trials of one policy
//! against one reward source.

use linkbandit_core::config::validate_options;
use linkbandit_core::{
    AppConfig, ArmOption, BanditError, BanditResult, HistorySnapshot, RunState, TrialRecord,
    TrialSink,
};
use linkbandit_environment::{build_reward_source, RewardSource};
use linkbandit_rl_engine::EpsilonGreedy;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct Experiment {
    options: Vec<ArmOption>,
    policy: EpsilonGreedy,
    source: Box<dyn RewardSource>,
    sinks: Vec<Arc<dyn TrialSink>>,
    history: Vec<TrialRecord>,
    state: RunState,
    checkpoint_every: Option<u64>,
}

impl Experiment {
    pub fn new(
        options: Vec<ArmOption>,
        policy: EpsilonGreedy,
        source: Box<dyn RewardSource>,
    ) -> BanditResult<Self> {
        validate_options(&options)?;
        if policy.num_arms() != options.len() {
            return Err(BanditError::invalid_config(format!(
                "policy has {} arms but {} options were given",
                policy.num_arms(),
                options.len()
            )));
        }
        Ok(Self {
            options,
            policy,
            source,
            sinks: Vec::new(),
            history: Vec::new(),
            state: RunState::Idle,
            checkpoint_every: None,
        })
    }

    /// Validate `config` and assemble the policy and reward source it
    /// describes. With a seed, both the policy and simulated noise are
    /// reproducible.
    pub fn from_config(config: &AppConfig) -> BanditResult<Self> {
        config.validate()?;

        let k = config.options.len();
        let epsilon = config.policy.epsilon;
        let rule = config.policy.update_rule;
        let policy = match config.seed {
            Some(seed) => EpsilonGreedy::with_seed(k, epsilon, rule, seed)?,
            None => EpsilonGreedy::new(k, epsilon, rule)?,
        };
        let source = build_reward_source(
            &config.environment,
            config.seed.map(|s| s.wrapping_add(1)),
        )?;

        let mut experiment = Self::new(config.options.clone(), policy, source)?;
        experiment.checkpoint_every = config.report.checkpoint_every;
        Ok(experiment)
    }

    pub fn with_sink(mut self, sink: Arc<dyn TrialSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Log a progress line every `every` trials.
    pub fn with_checkpoint_every(mut self, every: u64) -> Self {
        self.checkpoint_every = Some(every.max(1));
        self
    }

    /// Run `n_trials` trials to completion.
    pub async fn run(&mut self, n_trials: u64) -> BanditResult<RunState> {
        self.run_inner(n_trials, None).await
    }

    /// Run `n_trials` trials, stopping between trials once `shutdown` reads
    /// `true`.
    pub async fn run_with_shutdown(
        &mut self,
        n_trials: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> BanditResult<RunState> {
        self.run_inner(n_trials, Some(&mut shutdown)).await
    }

    async fn run_inner(
        &mut self,
        n_trials: u64,
        mut shutdown: Option<&mut watch::Receiver<bool>>,
    ) -> BanditResult<RunState> {
        if self.state != RunState::Idle {
            return Err(BanditError::InvalidState(format!(
                "run requested while {:?}",
                self.state
            )));
        }
        self.state = RunState::Running;
        info!(
            trials = n_trials,
            arms = self.options.len(),
            epsilon = self.policy.epsilon(),
            rule = ?self.policy.rule(),
            source = self.source.mode(),
            "experiment started"
        );

        for trial in 1..=n_trials {
            if let Some(rx) = shutdown.as_deref_mut() {
                if *rx.borrow_and_update() {
                    warn!(completed = trial - 1, "shutdown requested, aborting run");
                    self.state = RunState::Aborted;
                    return Ok(self.state);
                }
            }

            if let Err(e) = self.run_trial(trial).await {
                error!(trial, error = %e, "trial failed, aborting run");
                self.state = RunState::Aborted;
                return Err(e);
            }

            if let Some(every) = self.checkpoint_every {
                if trial % every == 0 {
                    self.log_checkpoint(trial);
                }
            }
        }

        self.state = RunState::Completed;
        info!(
            trials = self.history.len(),
            skipped = self.skipped(),
            best_option = %self.best_option(),
            "experiment completed"
        );
        Ok(self.state)
    }

    async fn run_trial(&mut self, trial: u64) -> BanditResult<()> {
        let arm = self.policy.select();
        let option = self.options[arm].clone();

        let reward = match self.source.get_reward(&option).await {
            Ok(reward) => {
                self.policy.update(arm, reward)?;
                metrics::counter!("trials.completed").increment(1);
                Some(reward)
            }
            Err(e) if e.is_recoverable() => {
                self.policy.abandon(arm)?;
                metrics::counter!("trials.skipped").increment(1);
                warn!(trial, option = %option, error = %e, "no reward, skipping update");
                None
            }
            Err(e) => {
                self.policy.abandon(arm)?;
                return Err(e);
            }
        };

        let record = TrialRecord::new(trial, option, reward);
        debug!(trial, option = %record.option, reward = ?record.reward, "trial recorded");
        self.emit(&record).await;
        self.history.push(record);
        Ok(())
    }

    async fn emit(&self, record: &TrialRecord) {
        for sink in &self.sinks {
            if let Err(e) = sink.append(record).await {
                metrics::counter!("trials.sink_errors").increment(1);
                error!(trial = record.trial, error = %e, "failed to hand record to sink");
            }
        }
    }

    fn log_checkpoint(&self, trial: u64) {
        let (sum, n) = self
            .history
            .iter()
            .filter_map(|r| r.reward)
            .fold((0.0, 0u64), |(s, n), r| (s + r, n + 1));
        let avg = if n > 0 { sum / n as f64 } else { 0.0 };
        info!(
            trial,
            average_reward = avg,
            skipped = self.skipped(),
            best_option = %self.best_option(),
            "checkpoint"
        );
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Trial records in trial order.
    pub fn history(&self) -> &[TrialRecord] {
        &self.history
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot::from_records(&self.history)
    }

    pub fn policy(&self) -> &EpsilonGreedy {
        &self.policy
    }

    pub fn options(&self) -> &[ArmOption] {
        &self.options
    }

    /// Option with the highest current value estimate.
    pub fn best_option(&self) -> &ArmOption {
        &self.options[self.policy.best_arm()]
    }

    pub fn skipped(&self) -> usize {
        self.history.iter().filter(|r| r.is_skipped()).count()
    }
}
