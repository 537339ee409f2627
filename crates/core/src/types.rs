use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// One selectable arm: a wireless channel number or a route descriptor.
///
/// Identifiers only need to be distinct; their numeric value carries no
/// meaning to the policy. A label made only of digits is always a channel,
/// whether it arrives as a number or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ArmOption {
    Channel(u32),
    Route(String),
}

impl ArmOption {
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ArmOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArmOption::Channel(ch) => write!(f, "{ch}"),
            ArmOption::Route(route) => f.write_str(route),
        }
    }
}

impl FromStr for ArmOption {
    type Err = Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        Ok(match raw.parse::<u32>() {
            Ok(ch) => ArmOption::Channel(ch),
            Err(_) => ArmOption::Route(raw.to_string()),
        })
    }
}

impl<'de> Deserialize<'de> for ArmOption {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Channel(u32),
            Label(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Channel(ch) => ArmOption::Channel(ch),
            Raw::Label(label) => match label.parse() {
                Ok(option) => option,
                Err(never) => match never {},
            },
        })
    }
}

impl From<u32> for ArmOption {
    fn from(ch: u32) -> Self {
        ArmOption::Channel(ch)
    }
}

impl From<&str> for ArmOption {
    fn from(route: &str) -> Self {
        ArmOption::Route(route.to_string())
    }
}

/// Outcome of a single completed trial. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 1-based, strictly increasing within a run.
    pub trial: u64,
    pub option: ArmOption,
    /// `None` when the reward source was unavailable and the update was skipped.
    pub reward: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl TrialRecord {
    pub fn new(trial: u64, option: ArmOption, reward: Option<f64>) -> Self {
        Self {
            trial,
            option,
            reward,
            timestamp: Utc::now(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.reward.is_none()
    }
}

/// Lifecycle of an experiment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Aborted,
}

/// Read-only view of the options chosen and rewards observed, in trial order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub options: Vec<ArmOption>,
    pub rewards: Vec<Option<f64>>,
}

impl HistorySnapshot {
    pub fn from_records(records: &[TrialRecord]) -> Self {
        Self {
            options: records.iter().map(|r| r.option.clone()).collect(),
            rewards: records.iter().map(|r| r.reward).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}
