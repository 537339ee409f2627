//! linkbandit: epsilon-greedy selection of wireless channels or routes
//! against a simulated or remote throughput measurement.
//!
//! Main entry point: assembles the run from config and CLI, executes it,
//! and reports the outcome.

use clap::{Parser, ValueEnum};
use linkbandit_analytics::TrialLogger;
use linkbandit_core::config::{AppConfig, LogFormat, UpdateRule};
use linkbandit_core::{ArmOption, BanditError, RunState};
use linkbandit_experiment::Experiment;
use linkbandit_reporting::RunReport;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RuleArg {
    IncrementalMean,
    ExponentialSmoothing,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Csv,
    JsonLines,
}

#[derive(Parser, Debug)]
#[command(name = "linkbandit")]
#[command(about = "Epsilon-greedy wireless channel / route selection")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, env = "LINKBANDIT_CONFIG")]
    config: Option<String>,

    /// Options to choose among: channel numbers or route descriptors
    #[arg(long, value_delimiter = ',')]
    options: Option<Vec<String>>,

    /// Number of trials (overrides config)
    #[arg(long, env = "LINKBANDIT__TRIALS")]
    trials: Option<u64>,

    /// Exploration rate in [0, 1] (overrides config)
    #[arg(long)]
    epsilon: Option<f64>,

    /// Value-estimate update rule (overrides config)
    #[arg(long, value_enum)]
    update_rule: Option<RuleArg>,

    /// Smoothing factor in (0, 1] for exponential smoothing
    #[arg(long)]
    alpha: Option<f64>,

    /// Seed for reproducible exploration and simulated noise
    #[arg(long)]
    seed: Option<u64>,

    /// Measurement service URL; omit for simulation mode
    #[arg(long, env = "LINKBANDIT__ENVIRONMENT__ENDPOINT")]
    endpoint: Option<String>,

    /// Measurement source endpoint
    #[arg(long)]
    source: Option<String>,

    /// Measurement destination endpoint
    #[arg(long)]
    destination: Option<String>,

    /// Intermediate hops of the measured path
    #[arg(long, value_delimiter = ',')]
    path: Option<Vec<String>>,

    /// Append trial records to this file
    #[arg(long)]
    log_file: Option<String>,

    /// Trial log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Write the JSON run report here
    #[arg(long)]
    report_file: Option<String>,

    /// Log a progress checkpoint every N trials
    #[arg(long)]
    checkpoint_every: Option<u64>,
}

fn apply_overrides(config: &mut AppConfig, cli: Cli) -> anyhow::Result<()> {
    if let Some(options) = cli.options {
        config.options = options
            .iter()
            .map(|o| o.parse::<ArmOption>())
            .collect::<Result<_, _>>()?;
    }
    if let Some(trials) = cli.trials {
        config.trials = trials;
    }
    if let Some(epsilon) = cli.epsilon {
        config.policy.epsilon = epsilon;
    }
    match (cli.update_rule, cli.alpha) {
        (Some(RuleArg::IncrementalMean), None) => {
            config.policy.update_rule = UpdateRule::IncrementalMean;
        }
        (Some(RuleArg::IncrementalMean), Some(_)) => {
            anyhow::bail!("--alpha only applies to --update-rule exponential-smoothing")
        }
        (Some(RuleArg::ExponentialSmoothing), Some(alpha)) | (None, Some(alpha)) => {
            config.policy.update_rule = UpdateRule::ExponentialSmoothing { alpha };
        }
        (Some(RuleArg::ExponentialSmoothing), None) => match config.policy.update_rule {
            UpdateRule::ExponentialSmoothing { .. } => {}
            UpdateRule::IncrementalMean => {
                anyhow::bail!("--update-rule exponential-smoothing needs --alpha")
            }
        },
        (None, None) => {}
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if cli.endpoint.is_some() {
        config.environment.endpoint = cli.endpoint;
    }
    if let Some(source) = cli.source {
        config.environment.source = source;
    }
    if let Some(destination) = cli.destination {
        config.environment.destination = destination;
    }
    if let Some(path) = cli.path {
        config.environment.path = path;
    }
    if cli.log_file.is_some() {
        config.trial_log.path = cli.log_file;
    }
    if let Some(format) = cli.log_format {
        config.trial_log.format = match format {
            LogFormatArg::Csv => LogFormat::Csv,
            LogFormatArg::JsonLines => LogFormat::JsonLines,
        };
    }
    if cli.report_file.is_some() {
        config.report.path = cli.report_file;
    }
    if cli.checkpoint_every.is_some() {
        config.report.checkpoint_every = cli.checkpoint_every;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkbandit=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("linkbandit starting up");

    // Load configuration from the optional file and LINKBANDIT__* env vars
    let mut config = AppConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, cli)?;
    config.validate()?;

    info!(
        options = config.options.len(),
        trials = config.trials,
        epsilon = config.policy.epsilon,
        update_rule = ?config.policy.update_rule,
        mode = if config.environment.is_simulated() { "simulated" } else { "remote" },
        "Configuration loaded"
    );

    if config.metrics.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics.port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(port = config.metrics.port, "Metrics exporter started");
    }

    let mut experiment = Experiment::from_config(&config)?;

    let logger = match &config.trial_log.path {
        Some(_) => {
            let logger = Arc::new(TrialLogger::new(&config.trial_log).await?);
            experiment = experiment.with_sink(logger.clone());
            Some(logger)
        }
        None => None,
    };

    // Stop between trials on Ctrl-C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current trial");
            let _ = shutdown_tx.send(true);
        }
    });

    let outcome = experiment
        .run_with_shutdown(config.trials, shutdown_rx)
        .await;

    if let Some(logger) = &logger {
        match logger.close().await {
            Ok(written) => info!(written, path = %logger.path().display(), "Trial log closed"),
            Err(e) => error!(error = %e, "Trial log did not flush cleanly"),
        }
    }

    let state = outcome?;
    if state == RunState::Aborted {
        warn!(completed = experiment.history().len(), "Run aborted before all trials");
    }

    match RunReport::from_history(experiment.history()) {
        Ok(report) => {
            println!("{}", report.render_table());
            if let Some(path) = &config.report.path {
                report.write_json(path)?;
            }
        }
        Err(BanditError::EmptyHistory) => warn!("No trials completed, nothing to report"),
        Err(e) => return Err(e.into()),
    }

    for (option, arm) in experiment.options().iter().zip(experiment.policy().arms()) {
        info!(option = %option, count = arm.count, estimate = arm.value, "Final estimate");
    }
    info!(best_option = %experiment.best_option(), "linkbandit finished");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["linkbandit"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_options_mix_channels_and_routes() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, cli(&["--options", "36, ap1/wlan0"])).unwrap();
        assert_eq!(
            config.options,
            vec![ArmOption::Channel(36), ArmOption::Route("ap1/wlan0".into())]
        );
    }

    #[test]
    fn test_overrides_replace_config() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            cli(&[
                "--options",
                "1,6,11",
                "--trials",
                "50",
                "--epsilon",
                "0.25",
                "--alpha",
                "0.4",
                "--seed",
                "7",
                "--endpoint",
                "http://127.0.0.1:8000/measure",
                "--path",
                "mesh-1,mesh-2",
            ]),
        )
        .unwrap();

        assert_eq!(config.options.len(), 3);
        assert_eq!(config.trials, 50);
        assert_eq!(config.policy.epsilon, 0.25);
        assert_eq!(
            config.policy.update_rule,
            UpdateRule::ExponentialSmoothing { alpha: 0.4 }
        );
        assert_eq!(config.seed, Some(7));
        assert!(!config.environment.is_simulated());
        assert_eq!(config.environment.path, vec!["mesh-1", "mesh-2"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_smoothing_without_alpha_is_rejected() {
        let mut config = AppConfig::default();
        let result = apply_overrides(&mut config, cli(&["--update-rule", "exponential-smoothing"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_alpha_with_incremental_mean_is_rejected() {
        let mut config = AppConfig::default();
        let result = apply_overrides(
            &mut config,
            cli(&["--update-rule", "incremental-mean", "--alpha", "0.3"]),
        );
        assert!(result.is_err());
        assert_eq!(config.policy.update_rule, UpdateRule::IncrementalMean);
    }
}
