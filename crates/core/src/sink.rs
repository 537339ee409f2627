//! Destination for trial records as the loop produces them.

use crate::error::BanditResult;
use crate::types::TrialRecord;
use async_trait::async_trait;

/// Append-only consumer of trial records. Records arrive in trial order and
/// are never read back by the producer.
#[async_trait]
pub trait TrialSink: Send + Sync {
    async fn append(&self, record: &TrialRecord) -> BanditResult<()>;
}
