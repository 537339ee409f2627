//! Run reporting: reward curves and per-option breakdowns computed from a
//! finished (or checkpointed) trial history.

pub mod run_report;

pub use run_report::{OptionSummary, RunReport, SeriesPoint};
