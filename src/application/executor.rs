//! Runs saga phases against an idempotency key.
//!
//! Each phase gets its own serializable transaction. The executor re-reads
//! the key inside that transaction, lets the phase do its work, applies the
//! phase outcome to the key and commits everything at once. Serialization
//! conflicts re-run the phase from scratch without limit; any other failure
//! releases the key's lock and is returned to the caller. A phase never runs
//! once another attempt has taken the lock over.

use super::database::{Database, Transaction};
use super::idempotency::IdempotencyStore;
use super::phase::{AtomicPhase, PhaseOutcome, Saga};
use crate::domain::idempotency::{CachedResponse, IdempotencyKey, RecoveryPoint};
use crate::error::{PaymentError, Result};
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct PhaseExecutor {
    db: Database,
    idempotency: IdempotencyStore,
}

impl PhaseExecutor {
    pub fn new(db: Database, idempotency: IdempotencyStore) -> Self {
        Self { db, idempotency }
    }

    /// Runs `phase` once to completion, retrying on serialization conflicts.
    ///
    /// On success `key` holds the committed state of the record.
    pub async fn run_phase(&self, key: &mut IdempotencyKey, phase: &dyn AtomicPhase) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.attempt(key, phase).await {
                Ok(committed) => {
                    *key = committed;
                    return Ok(());
                }
                Err(err) if err.is_serialization_conflict() => {
                    warn!(
                        phase = phase.name(),
                        key = %key.key,
                        attempt,
                        "serialization conflict, retrying phase"
                    );
                    tokio::task::yield_now().await;
                }
                Err(err) => {
                    self.release_after_failure(key, &err).await;
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, key: &IdempotencyKey, phase: &dyn AtomicPhase) -> Result<IdempotencyKey> {
        let mut tx = self.db.begin();
        let mut current = reload(&mut tx, key).await?;

        // Another attempt finished the key after our lock expired; the
        // driver replays its response.
        if current.is_finished() {
            return Ok(current);
        }
        if current.locked_at != key.locked_at {
            warn!(
                phase = phase.name(),
                key = %key.key,
                "idempotency key lock was taken over by another attempt"
            );
            return Err(PaymentError::OperationInProgress);
        }

        debug!(phase = phase.name(), key = %key.key, recovery_point = %key.recovery_point, "running phase");
        match phase.execute(&mut tx, &current).await? {
            PhaseOutcome::NoAction => {}
            PhaseOutcome::AdvanceRecoveryPoint(point) => {
                current.recovery_point = point;
                tx.put_idempotency_key(&current)?;
            }
            PhaseOutcome::RecordResponse(response) => {
                current.recovery_point = RecoveryPoint::Finished;
                current.locked_at = None;
                current.response = Some(response);
                tx.put_idempotency_key(&current)?;
            }
        }

        tx.commit().await?;
        Ok(current)
    }

    async fn release_after_failure(&self, key: &IdempotencyKey, cause: &PaymentError) {
        if let Err(release_err) = self.idempotency.release_lock(key).await {
            error!(
                key = %key.key,
                owner = key.owner,
                cause = %cause,
                error = %release_err,
                "failed to release idempotency key lock"
            );
        }
    }

    /// Runs phases of `saga` until the key is finished and returns the
    /// cached response.
    pub async fn drive(&self, saga: &dyn Saga, key: &mut IdempotencyKey) -> Result<CachedResponse> {
        while !key.is_finished() {
            let point = key.recovery_point;
            let Some(phase) = saga.phase(point) else {
                let err = PaymentError::Invariant(format!(
                    "{} saga has no phase for recovery point {point}",
                    saga.name()
                ));
                self.release_after_failure(key, &err).await;
                return Err(err);
            };

            self.run_phase(key, phase.as_ref()).await?;

            if key.recovery_point == point {
                let err = PaymentError::Invariant(format!(
                    "phase {} of the {} saga neither advanced nor finished",
                    phase.name(),
                    saga.name()
                ));
                self.release_after_failure(key, &err).await;
                return Err(err);
            }
        }

        key.response.clone().ok_or_else(|| {
            PaymentError::Invariant(format!("finished key '{}' has no response", key.key))
        })
    }
}

async fn reload(tx: &mut Transaction, key: &IdempotencyKey) -> Result<IdempotencyKey> {
    tx.idempotency_key(key.owner, &key.key).await?.ok_or_else(|| {
        PaymentError::Invariant(format!("idempotency key '{}' disappeared", key.key))
    })
}
