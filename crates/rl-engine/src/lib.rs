//! Reinforcement learning engine: epsilon-greedy arm selection with a
//! selectable value-estimation rule (incremental mean or exponential smoothing).

pub mod bandits;

pub use bandits::{ArmStats, EpsilonGreedy};
pub use linkbandit_core::config::UpdateRule;
