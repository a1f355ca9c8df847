use super::database::Transaction;
use crate::domain::bank::PartnerError;
use crate::domain::idempotency::{CachedResponse, IdempotencyKey, RecoveryPoint};
use crate::error::{ErrorBody, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

/// What a phase asks the executor to do with its transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    /// Commit local writes and leave the key as it is.
    ///
    /// Key resolution has this shape but commits on its own in
    /// `IdempotencyStore::resolve`, before any phase runs. Saga phases do not
    /// return it: `PhaseExecutor::drive` rejects a phase that leaves the
    /// recovery point unchanged.
    NoAction,
    /// Commit local writes and move the key to the given point.
    AdvanceRecoveryPoint(RecoveryPoint),
    /// Commit local writes, finish the key, unlock it and cache the response.
    RecordResponse(CachedResponse),
}

/// One step of a saga, run inside a single serializable transaction.
///
/// A phase may be executed several times for the same key (conflict retries,
/// resumed attempts), so it must re-read local state from `tx` rather than
/// assume what a previous run left behind. Foreign calls it makes must use a
/// token derived from `key`.
#[async_trait]
pub trait AtomicPhase: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, tx: &mut Transaction, key: &IdempotencyKey) -> Result<PhaseOutcome>;
}

/// An operation type: the phase to run at each non-terminal recovery point.
pub trait Saga: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when `point` is not part of this saga.
    fn phase(&self, point: RecoveryPoint) -> Option<Box<dyn AtomicPhase + '_>>;
}

/// Maps a failed partner call onto the phase result.
///
/// A rejection is the partner's final word and becomes the cached response.
/// An unreachable partner is returned as an error so the caller can retry
/// with the same key.
pub fn partner_failure(phase: &str, err: PartnerError, now: DateTime<Utc>) -> Result<PhaseOutcome> {
    match err {
        PartnerError::Rejected { status, message } => {
            warn!(phase, status, %message, "banking partner rejected request");
            let body = ErrorBody::new(now, status, message, None);
            Ok(PhaseOutcome::RecordResponse(CachedResponse::new(
                status,
                serde_json::to_value(body)?,
            )))
        }
        unavailable @ PartnerError::Unavailable(_) => Err(unavailable.into()),
    }
}
