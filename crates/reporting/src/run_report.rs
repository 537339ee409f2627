//! Summary of a trial history for external renderers.

use chrono::{DateTime, Utc};
use linkbandit_core::{ArmOption, BanditError, BanditResult, TrialRecord};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Running average reward after a rewarded trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub trial: u64,
    pub average_reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSummary {
    pub option: ArmOption,
    /// Times the option was selected, skipped trials included.
    pub pulls: u64,
    /// Times a reward was actually observed.
    pub rewarded: u64,
    pub total_reward: f64,
    pub mean_reward: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub trials: u64,
    pub skipped: u64,
    pub total_reward: f64,
    pub average_reward: Option<f64>,
    pub cumulative_average: Vec<SeriesPoint>,
    /// In order of first selection.
    pub per_option: Vec<OptionSummary>,
    pub best_observed: Option<ArmOption>,
    pub generated_at: DateTime<Utc>,
}

impl RunReport {
    pub fn from_history(records: &[TrialRecord]) -> BanditResult<Self> {
        if records.is_empty() {
            return Err(BanditError::EmptyHistory);
        }

        let mut per_option: Vec<OptionSummary> = Vec::new();
        let mut cumulative_average = Vec::new();
        let mut total_reward = 0.0;
        let mut rewarded = 0u64;

        for record in records {
            let idx = match per_option.iter().position(|s| s.option == record.option) {
                Some(idx) => idx,
                None => {
                    per_option.push(OptionSummary {
                        option: record.option.clone(),
                        pulls: 0,
                        rewarded: 0,
                        total_reward: 0.0,
                        mean_reward: None,
                    });
                    per_option.len() - 1
                }
            };
            let summary = &mut per_option[idx];
            summary.pulls += 1;

            if let Some(reward) = record.reward {
                summary.rewarded += 1;
                summary.total_reward += reward;

                rewarded += 1;
                total_reward += reward;
                cumulative_average.push(SeriesPoint {
                    trial: record.trial,
                    average_reward: total_reward / rewarded as f64,
                });
            }
        }

        for summary in &mut per_option {
            if summary.rewarded > 0 {
                summary.mean_reward = Some(summary.total_reward / summary.rewarded as f64);
            }
        }

        let best_observed = per_option
            .iter()
            .filter_map(|s| s.mean_reward.map(|m| (m, &s.option)))
            .fold(None::<(f64, &ArmOption)>, |best, (m, option)| match best {
                Some((bm, _)) if bm >= m => best,
                _ => Some((m, option)),
            })
            .map(|(_, option)| option.clone());

        let trials = records.len() as u64;
        Ok(Self {
            trials,
            skipped: trials - rewarded,
            total_reward,
            average_reward: (rewarded > 0).then(|| total_reward / rewarded as f64),
            cumulative_average,
            per_option,
            best_observed,
            generated_at: Utc::now(),
        })
    }

    /// Plain-text table for terminals and log files.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "trials: {}  skipped: {}  average reward: {}",
            self.trials,
            self.skipped,
            fmt_opt(self.average_reward)
        );
        let _ = writeln!(
            out,
            "{:<16} {:>8} {:>9} {:>12}",
            "option", "pulls", "rewarded", "mean reward"
        );
        for s in &self.per_option {
            let _ = writeln!(
                out,
                "{:<16} {:>8} {:>9} {:>12}",
                s.option.label(),
                s.pulls,
                s.rewarded,
                fmt_opt(s.mean_reward)
            );
        }
        if let Some(best) = &self.best_observed {
            let _ = writeln!(out, "best observed option: {best}");
        }
        out
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> BanditResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "run report written");
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.3}"))
        .unwrap_or_else(|| "-".to_string())
}
