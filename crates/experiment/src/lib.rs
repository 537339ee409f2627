//! Trial loop: sequences select → reward → update → record for one agent
//! against one reward source.

pub mod experiment;

pub use experiment::Experiment;
