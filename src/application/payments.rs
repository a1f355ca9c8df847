//! Payments to directory recipients: `Started -> PaymentCreated -> Finished`.
//!
//! The submit phase picks the settlement rail from what the recipient's
//! routing number supports. Real-time is preferred and ACH is the fallback.
//! When neither is available the request is refused.

use super::accounts::owned_account;
use super::audit::AuditTrail;
use super::database::{Listing, Page, Transaction};
use super::engine::{PaymentEngine, RequestContext};
use super::phase::{AtomicPhase, PhaseOutcome, Saga, partner_failure};
use crate::domain::account::Account;
use crate::domain::audit::{AuditAction, ResourceType};
use crate::domain::bank::{BankPayment, BankingPartner, CreatePaymentRequest};
use crate::domain::idempotency::{
    CachedResponse, ForeignOperation, IdempotencyKey, RecoveryPoint, RequestFingerprint,
};
use crate::domain::payment::{CreatePaymentInput, Payment, select_rail};
use crate::domain::ports::{Clock, RecipientDirectory};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

const PAYMENTS_PATH: &str = "/v1/payments";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentDetails {
    pub payment: Payment,
    pub bank_payment: Option<BankPayment>,
}

/// Optional narrowing for payment listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaymentFilter {
    pub account_id: Option<u64>,
    pub recipient_id: Option<u64>,
}

impl PaymentFilter {
    fn accepts(&self, payment: &Payment) -> bool {
        self.account_id.is_none_or(|id| payment.account_id == id)
            && self.recipient_id.is_none_or(|id| payment.recipient_id == id)
    }
}

pub struct PaymentService<'a> {
    engine: &'a PaymentEngine,
}

impl<'a> PaymentService<'a> {
    pub(super) fn new(engine: &'a PaymentEngine) -> Self {
        Self { engine }
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        idempotency_key: &str,
        input: CreatePaymentInput,
    ) -> Result<CachedResponse> {
        let fingerprint = RequestFingerprint::new(
            "POST",
            PAYMENTS_PATH,
            std::iter::empty::<(String, String)>(),
            &input,
        )?;
        let saga = PaymentSaga {
            partner: self.engine.partner.clone(),
            recipients: self.engine.recipients.clone(),
            clock: self.engine.clock.clone(),
            audit: self.engine.audit(ctx),
            input,
        };
        self.engine
            .run_saga(ctx, idempotency_key, fingerprint, &saga)
            .await
    }

    pub async fn get(&self, owner: u64, id: u64) -> Result<PaymentDetails> {
        let payment = match self.engine.db.get::<Payment>(id).await? {
            Some(payment) if payment.owner == owner => payment,
            _ => return Err(PaymentError::NotFound(format!("payment {id}"))),
        };
        let bank_payment = match (payment.bank_transfer_id.as_deref(), payment.rail) {
            (Some(bank_id), Some(rail)) => Some(self.engine.partner.get_payment(bank_id, rail).await?),
            _ => None,
        };
        Ok(PaymentDetails {
            payment,
            bank_payment,
        })
    }

    pub async fn list(&self, owner: u64, filter: PaymentFilter, page: &Page) -> Result<Listing<Payment>> {
        self.engine
            .db
            .list(page, |payment: &Payment| {
                payment.owner == owner && filter.accepts(payment)
            })
            .await
    }
}

struct PaymentSaga {
    partner: Arc<dyn BankingPartner>,
    recipients: Arc<dyn RecipientDirectory>,
    clock: Arc<dyn Clock>,
    audit: AuditTrail,
    input: CreatePaymentInput,
}

impl Saga for PaymentSaga {
    fn name(&self) -> &'static str {
        "payment creation"
    }

    fn phase(&self, point: RecoveryPoint) -> Option<Box<dyn AtomicPhase + '_>> {
        match point {
            RecoveryPoint::Started => Some(Box::new(CreateLocalPayment(self))),
            RecoveryPoint::PaymentCreated => Some(Box::new(SubmitPayment(self))),
            _ => None,
        }
    }
}

struct CreateLocalPayment<'a>(&'a PaymentSaga);

#[async_trait]
impl<'a> AtomicPhase for CreateLocalPayment<'a> {
    fn name(&self) -> &'static str {
        "create local payment"
    }

    async fn execute(&self, tx: &mut Transaction, key: &IdempotencyKey) -> Result<PhaseOutcome> {
        let saga = self.0;
        if tx.find_by_key::<Payment>(key.id).await?.is_none() {
            let account = owned_account(tx, key.owner, saga.input.account_id).await?;
            account.provisioned_id()?;

            let payment = tx
                .insert(Payment::new(key, &saga.input, saga.clock.now()))
                .await?;
            saga.audit
                .record(tx, key, AuditAction::CreatePayment, ResourceType::Payment, payment.id, &payment)
                .await?;
        }
        Ok(PhaseOutcome::AdvanceRecoveryPoint(RecoveryPoint::PaymentCreated))
    }
}

struct SubmitPayment<'a>(&'a PaymentSaga);

#[async_trait]
impl<'a> AtomicPhase for SubmitPayment<'a> {
    fn name(&self) -> &'static str {
        "submit payment"
    }

    async fn execute(&self, tx: &mut Transaction, key: &IdempotencyKey) -> Result<PhaseOutcome> {
        let saga = self.0;
        let mut payment: Payment = tx.find_by_key(key.id).await?.ok_or_else(|| {
            PaymentError::Invariant(format!("no payment linked to idempotency key {}", key.id))
        })?;

        if payment.bank_transfer_id.is_none() {
            let account: Account = tx.load(payment.account_id).await?.ok_or_else(|| {
                PaymentError::Invariant(format!(
                    "payment {} references missing account {}",
                    payment.id, payment.account_id
                ))
            })?;
            let bank_account_id = account.provisioned_id()?.to_string();
            let account_number_id = account.bank_account_number_id.clone().ok_or_else(|| {
                PaymentError::BadRequest(format!("account {} has no account number", account.id))
            })?;

            let recipient = saga
                .recipients
                .get(payment.recipient_id)
                .await?
                .ok_or_else(|| PaymentError::NotFound(format!("recipient {}", payment.recipient_id)))?;
            let destination = recipient.bank_address.clone().ok_or_else(|| {
                PaymentError::BadRequest(format!("recipient {} has no bank address", recipient.id))
            })?;

            let capabilities = match saga.partner.routing_capabilities(&destination.routing_number).await {
                Ok(capabilities) => capabilities,
                Err(err) => return partner_failure(self.name(), err, saga.clock.now()),
            };
            let rail = select_rail(&capabilities).ok_or_else(|| {
                PaymentError::BadRequest(format!(
                    "routing number {} supports no payment rail",
                    destination.routing_number
                ))
            })?;

            let token = key.foreign_token(ForeignOperation::SubmitPayment);
            info!(payment_id = payment.id, %rail, idempotency_token = %token, "submitting payment");
            let request = CreatePaymentRequest {
                account_id: bank_account_id,
                account_number_id,
                amount: payment.amount.minor_units()?,
                description: payment.description.clone(),
                creditor: recipient.creditor(),
                rail,
                destination,
                idempotency_token: token,
            };
            let submitted = match saga.partner.create_payment(request).await {
                Ok(submitted) => submitted,
                Err(err) => return partner_failure(self.name(), err, saga.clock.now()),
            };

            payment.rail = Some(submitted.rail);
            payment.bank_transfer_id = Some(submitted.id);
            payment.bank_status = Some(submitted.status);
            tx.update(&payment)?;
            saga.audit
                .record(tx, key, AuditAction::SubmitPayment, ResourceType::Payment, payment.id, &payment)
                .await?;
        }
        Ok(PhaseOutcome::RecordResponse(CachedResponse::new(
            201,
            payment.to_body(),
        )))
    }
}
