//! Durable, append-only trial log.

pub mod logger;

pub use logger::TrialLogger;
