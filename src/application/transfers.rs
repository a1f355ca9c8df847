//! Transfers to explicit bank coordinates: `Started -> TransferCreated -> Finished`.

use super::accounts::owned_account;
use super::audit::AuditTrail;
use super::database::{Listing, Page, Transaction};
use super::engine::{PaymentEngine, RequestContext};
use super::phase::{AtomicPhase, PhaseOutcome, Saga, partner_failure};
use crate::domain::account::Account;
use crate::domain::audit::{AuditAction, ResourceType};
use crate::domain::bank::{BankTransfer, BankingPartner, TransferFundsRequest};
use crate::domain::idempotency::{
    CachedResponse, ForeignOperation, IdempotencyKey, RecoveryPoint, RequestFingerprint,
};
use crate::domain::ports::Clock;
use crate::domain::transfer::{CreateTransferInput, Transfer};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

const TRANSFERS_PATH: &str = "/v1/transfers";

/// A local transfer together with the partner's current view of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferDetails {
    pub transfer: Transfer,
    pub bank_transfer: Option<BankTransfer>,
}

pub struct TransferService<'a> {
    engine: &'a PaymentEngine,
}

impl<'a> TransferService<'a> {
    pub(super) fn new(engine: &'a PaymentEngine) -> Self {
        Self { engine }
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        idempotency_key: &str,
        input: CreateTransferInput,
    ) -> Result<CachedResponse> {
        if input.account_number.is_empty() || input.routing_number.is_empty() {
            return Err(PaymentError::ValidationError(
                "account and routing numbers are required".to_string(),
            ));
        }

        let fingerprint = RequestFingerprint::new(
            "POST",
            TRANSFERS_PATH,
            std::iter::empty::<(String, String)>(),
            &input,
        )?;
        let saga = TransferSaga {
            partner: self.engine.partner.clone(),
            clock: self.engine.clock.clone(),
            audit: self.engine.audit(ctx),
            input,
        };
        self.engine
            .run_saga(ctx, idempotency_key, fingerprint, &saga)
            .await
    }

    pub async fn get(&self, owner: u64, id: u64) -> Result<TransferDetails> {
        let transfer = match self.engine.db.get::<Transfer>(id).await? {
            Some(transfer) if transfer.owner == owner => transfer,
            _ => return Err(PaymentError::NotFound(format!("transfer {id}"))),
        };
        let bank_transfer = match transfer.bank_transfer_id.as_deref() {
            Some(bank_id) => Some(self.engine.partner.get_transfer(bank_id).await?),
            None => None,
        };
        Ok(TransferDetails {
            transfer,
            bank_transfer,
        })
    }

    pub async fn list(&self, owner: u64, account_id: Option<u64>, page: &Page) -> Result<Listing<Transfer>> {
        self.engine
            .db
            .list(page, |transfer: &Transfer| {
                transfer.owner == owner && account_id.is_none_or(|id| transfer.account_id == id)
            })
            .await
    }
}

struct TransferSaga {
    partner: Arc<dyn BankingPartner>,
    clock: Arc<dyn Clock>,
    audit: AuditTrail,
    input: CreateTransferInput,
}

impl Saga for TransferSaga {
    fn name(&self) -> &'static str {
        "transfer creation"
    }

    fn phase(&self, point: RecoveryPoint) -> Option<Box<dyn AtomicPhase + '_>> {
        match point {
            RecoveryPoint::Started => Some(Box::new(CreateLocalTransfer(self))),
            RecoveryPoint::TransferCreated => Some(Box::new(SubmitTransfer(self))),
            _ => None,
        }
    }
}

struct CreateLocalTransfer<'a>(&'a TransferSaga);

#[async_trait]
impl<'a> AtomicPhase for CreateLocalTransfer<'a> {
    fn name(&self) -> &'static str {
        "create local transfer"
    }

    async fn execute(&self, tx: &mut Transaction, key: &IdempotencyKey) -> Result<PhaseOutcome> {
        let saga = self.0;
        if tx.find_by_key::<Transfer>(key.id).await?.is_none() {
            let account = owned_account(tx, key.owner, saga.input.account_id).await?;
            account.provisioned_id()?;

            let transfer = tx
                .insert(Transfer::new(key, &saga.input, saga.clock.now()))
                .await?;
            saga.audit
                .record(tx, key, AuditAction::CreateTransfer, ResourceType::Transfer, transfer.id, &transfer)
                .await?;
        }
        Ok(PhaseOutcome::AdvanceRecoveryPoint(RecoveryPoint::TransferCreated))
    }
}

struct SubmitTransfer<'a>(&'a TransferSaga);

#[async_trait]
impl<'a> AtomicPhase for SubmitTransfer<'a> {
    fn name(&self) -> &'static str {
        "submit transfer"
    }

    async fn execute(&self, tx: &mut Transaction, key: &IdempotencyKey) -> Result<PhaseOutcome> {
        let saga = self.0;
        let mut transfer: Transfer = tx.find_by_key(key.id).await?.ok_or_else(|| {
            PaymentError::Invariant(format!("no transfer linked to idempotency key {}", key.id))
        })?;
        let account: Account = tx.load(transfer.account_id).await?.ok_or_else(|| {
            PaymentError::Invariant(format!(
                "transfer {} references missing account {}",
                transfer.id, transfer.account_id
            ))
        })?;

        if transfer.bank_transfer_id.is_none() {
            let token = key.foreign_token(ForeignOperation::SubmitTransfer);
            info!(transfer_id = transfer.id, idempotency_token = %token, "submitting transfer");
            let request = TransferFundsRequest {
                account_id: account.provisioned_id()?.to_string(),
                amount: transfer.amount.minor_units()?,
                description: transfer.description.clone(),
                account_number: transfer.account_number.clone(),
                routing_number: transfer.routing_number.clone(),
                idempotency_token: token,
            };
            let submitted = match saga.partner.transfer_funds(request).await {
                Ok(submitted) => submitted,
                Err(err) => return partner_failure(self.name(), err, saga.clock.now()),
            };

            transfer.bank_transfer_id = Some(submitted.id);
            transfer.bank_status = Some(submitted.status);
            tx.update(&transfer)?;
            saga.audit
                .record(tx, key, AuditAction::SubmitTransfer, ResourceType::Transfer, transfer.id, &transfer)
                .await?;
        }
        Ok(PhaseOutcome::RecordResponse(CachedResponse::new(
            201,
            transfer.to_body(),
        )))
    }
}
