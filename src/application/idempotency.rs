use super::database::Database;
use crate::domain::idempotency::{IdempotencyKey, IdempotentRequest};
use crate::domain::ports::{Clock, Table};
use crate::error::{PaymentError, Result};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of presenting an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub key: IdempotencyKey,
    /// Whether this request created the key.
    pub is_new: bool,
}

/// Obtains, validates and locks idempotency keys.
#[derive(Clone)]
pub struct IdempotencyStore {
    db: Database,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl IdempotencyStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>, lock_timeout: Duration) -> Self {
        Self {
            db,
            clock,
            lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Finds or creates the key for `request` and takes its lock.
    ///
    /// A finished key is returned unlocked so its response can be replayed.
    /// Fails with `FingerprintConflict` when the key was first used for a
    /// different request, and with `OperationInProgress` while another
    /// attempt holds a live lock.
    pub async fn resolve(&self, request: &IdempotentRequest) -> Result<Resolution> {
        loop {
            match self.try_resolve(request).await {
                Err(err) if err.is_serialization_conflict() => {
                    warn!(
                        owner = request.owner,
                        key = %request.key,
                        "serialization conflict while resolving idempotency key, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }

    async fn try_resolve(&self, request: &IdempotentRequest) -> Result<Resolution> {
        let now = self.clock.now();
        let mut tx = self.db.begin();

        let Some(mut key) = tx.idempotency_key(request.owner, &request.key).await? else {
            let id = tx.next_id(Table::IdempotencyKeys.name()).await?;
            let key = IdempotencyKey::new(id, request, now);
            tx.put_idempotency_key(&key)?;
            tx.commit().await?;

            info!(owner = key.owner, key = %key.key, id = key.id, "created idempotency key");
            return Ok(Resolution { key, is_new: true });
        };

        if !key.fingerprint.matches(&request.fingerprint)? {
            return Err(PaymentError::FingerprintConflict(format!(
                "key '{}' was first used for {} {}",
                key.key, key.fingerprint.method, key.fingerprint.path
            )));
        }

        if key.is_finished() {
            debug!(owner = key.owner, key = %key.key, "idempotency key already finished");
            return Ok(Resolution { key, is_new: false });
        }

        if key.lock_is_live(now, self.lock_timeout) {
            return Err(PaymentError::OperationInProgress);
        }

        key.locked_at = Some(now);
        key.last_run_at = now;
        tx.put_idempotency_key(&key)?;
        tx.commit().await?;

        info!(
            owner = key.owner,
            key = %key.key,
            recovery_point = %key.recovery_point,
            "resuming idempotency key"
        );
        Ok(Resolution { key, is_new: false })
    }

    /// Clears the lock `held` was resolved with so a later retry can resume
    /// straight away. A lock since taken over by another attempt is left
    /// alone.
    pub async fn release_lock(&self, held: &IdempotencyKey) -> Result<()> {
        loop {
            let mut tx = self.db.begin();
            let Some(mut record) = tx.idempotency_key(held.owner, &held.key).await? else {
                return Ok(());
            };
            if record.locked_at.is_none() || record.locked_at != held.locked_at {
                return Ok(());
            }
            record.locked_at = None;
            tx.put_idempotency_key(&record)?;

            match tx.commit().await {
                Err(err) if err.is_serialization_conflict() => tokio::task::yield_now().await,
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::idempotency::{RecoveryPoint, RequestFingerprint};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryStore;
    use serde_json::json;

    fn request(key: &str, name: &str) -> IdempotentRequest {
        let fingerprint =
            RequestFingerprint::new("POST", "/v1/accounts", Vec::<(String, String)>::new(), &json!({"name": name}))
                .unwrap();
        IdempotentRequest::new(1, key, fingerprint)
    }

    fn store() -> (IdempotencyStore, Arc<ManualClock>, Database) {
        let db = Database::new(Arc::new(InMemoryStore::new()));
        let clock = Arc::new(ManualClock::default());
        let store = IdempotencyStore::new(db.clone(), clock.clone(), Duration::minutes(5));
        (store, clock, db)
    }

    #[tokio::test]
    async fn test_first_sight_creates_locked_key() {
        let (store, _clock, _db) = store();
        let resolution = store.resolve(&request("k1", "Acme")).await.unwrap();

        assert!(resolution.is_new);
        assert_eq!(resolution.key.recovery_point, RecoveryPoint::Started);
        assert!(resolution.key.locked_at.is_some());
    }

    #[tokio::test]
    async fn test_live_lock_reports_in_progress() {
        let (store, _clock, _db) = store();
        store.resolve(&request("k1", "Acme")).await.unwrap();

        let err = store.resolve(&request("k1", "Acme")).await.unwrap_err();
        assert!(matches!(err, PaymentError::OperationInProgress));
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_is_rejected() {
        let (store, _clock, _db) = store();
        store.resolve(&request("k1", "Acme")).await.unwrap();

        let err = store.resolve(&request("k1", "Globex")).await.unwrap_err();
        assert!(matches!(err, PaymentError::FingerprintConflict(_)));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, clock, _db) = store();
        let first = store.resolve(&request("k1", "Acme")).await.unwrap();

        clock.advance(Duration::minutes(6));
        let second = store.resolve(&request("k1", "Acme")).await.unwrap();

        assert!(!second.is_new);
        assert_eq!(second.key.id, first.key.id);
        assert!(second.key.last_run_at > first.key.last_run_at);
    }

    #[tokio::test]
    async fn test_release_lock_allows_resume() {
        let (store, _clock, db) = store();
        let resolution = store.resolve(&request("k1", "Acme")).await.unwrap();
        store.release_lock(&resolution.key).await.unwrap();

        let stored = db.idempotency_key(1, "k1").await.unwrap().unwrap();
        assert!(stored.locked_at.is_none());
        assert!(store.resolve(&request("k1", "Acme")).await.is_ok());

        let mut missing = resolution.key.clone();
        missing.key = "missing".to_string();
        store.release_lock(&missing).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_attempt_cannot_release_new_lock() {
        let (store, clock, db) = store();
        let stale = store.resolve(&request("k1", "Acme")).await.unwrap();

        clock.advance(Duration::minutes(6));
        let current = store.resolve(&request("k1", "Acme")).await.unwrap();
        store.release_lock(&stale.key).await.unwrap();

        let stored = db.idempotency_key(1, "k1").await.unwrap().unwrap();
        assert_eq!(stored.locked_at, current.key.locked_at);
        let err = store.resolve(&request("k1", "Acme")).await.unwrap_err();
        assert!(matches!(err, PaymentError::OperationInProgress));
    }
}
