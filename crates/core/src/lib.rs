pub mod config;
pub mod error;
pub mod sink;
pub mod types;

pub use config::AppConfig;
pub use error::{BanditError, BanditResult};
pub use sink::TrialSink;
pub use types::{ArmOption, HistorySnapshot, RunState, TrialRecord};
