use super::accounts::AccountService;
use super::audit::AuditTrail;
use super::database::Database;
use super::executor::PhaseExecutor;
use super::idempotency::{IdempotencyStore, Resolution};
use super::payments::PaymentService;
use super::phase::Saga;
use super::transfers::TransferService;
use crate::config::EngineConfig;
use crate::domain::audit::{AuditRecord, ResourceType};
use crate::domain::bank::BankingPartner;
use crate::domain::idempotency::{CachedResponse, IdempotentRequest, RequestFingerprint};
use crate::domain::ports::{Clock, KvStoreRef, RecipientDirectory};
use crate::domain::recipient::Recipient;
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use tracing::info;

/// Who is calling and from where. Every mutating request carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub owner: u64,
    pub origin_ip: String,
}

impl RequestContext {
    pub fn new(owner: u64, origin_ip: impl Into<String>) -> Self {
        Self {
            owner,
            origin_ip: origin_ip.into(),
        }
    }
}

/// The main entry point for payment orchestration.
///
/// `PaymentEngine` owns local storage, the banking partner client, the
/// recipient directory and the clock. Everything is injected at construction;
/// the engine keeps no global state and is cheap to clone.
#[derive(Clone)]
pub struct PaymentEngine {
    pub(super) db: Database,
    pub(super) partner: Arc<dyn BankingPartner>,
    pub(super) recipients: Arc<dyn RecipientDirectory>,
    pub(super) clock: Arc<dyn Clock>,
    idempotency: IdempotencyStore,
    executor: PhaseExecutor,
}

impl PaymentEngine {
    /// Creates a new `PaymentEngine` instance.
    ///
    /// # Arguments
    ///
    /// * `store` - Versioned key-value storage for local state.
    /// * `partner` - Client for the banking partner.
    /// * `recipients` - Directory of payment recipients.
    /// * `clock` - Source of timestamps and lock expiry.
    /// * `config` - Engine settings such as the lock timeout.
    pub fn new(
        store: KvStoreRef,
        partner: Arc<dyn BankingPartner>,
        recipients: Arc<dyn RecipientDirectory>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let db = Database::new(store);
        let idempotency = IdempotencyStore::new(db.clone(), clock.clone(), config.lock_timeout());
        let executor = PhaseExecutor::new(db.clone(), idempotency.clone());
        Self {
            db,
            partner,
            recipients,
            clock,
            idempotency,
            executor,
        }
    }

    pub fn accounts(&self) -> AccountService<'_> {
        AccountService::new(self)
    }

    pub fn transfers(&self) -> TransferService<'_> {
        TransferService::new(self)
    }

    pub fn payments(&self) -> PaymentService<'_> {
        PaymentService::new(self)
    }

    pub async fn recipient(&self, id: u64) -> Result<Recipient> {
        self.recipients
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("recipient {id}")))
    }

    pub async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        self.recipients.list().await
    }

    /// Audit records for one resource, oldest first.
    pub async fn audit_trail(&self, resource_type: ResourceType, resource_id: u64) -> Result<Vec<AuditRecord>> {
        self.db.audit_records(resource_type, resource_id).await
    }

    pub(super) fn audit(&self, ctx: &RequestContext) -> AuditTrail {
        AuditTrail::new(ctx.origin_ip.clone(), self.clock.clone())
    }

    /// Resolves the idempotency key and drives `saga` to its response.
    ///
    /// A key that already finished replays its cached response without
    /// running any phase.
    pub(super) async fn run_saga(
        &self,
        ctx: &RequestContext,
        idempotency_key: &str,
        fingerprint: RequestFingerprint,
        saga: &dyn Saga,
    ) -> Result<CachedResponse> {
        let request = IdempotentRequest::new(ctx.owner, idempotency_key, fingerprint);
        let Resolution { mut key, is_new } = self.idempotency.resolve(&request).await?;

        if key.is_finished() {
            info!(owner = key.owner, key = %key.key, "replaying cached response");
            return key.response.ok_or_else(|| {
                PaymentError::Invariant(format!("finished key '{idempotency_key}' has no response"))
            });
        }

        info!(
            saga = saga.name(),
            owner = key.owner,
            key = %key.key,
            is_new,
            recovery_point = %key.recovery_point,
            "running saga"
        );
        self.executor.drive(saga, &mut key).await
    }
}
