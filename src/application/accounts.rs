//! Account provisioning and account queries.
//!
//! Provisioning runs `Started -> AccountCreated -> BankAccountCreated ->
//! Finished`: a local row first, then the partner account, then a partner
//! account number that refuses inbound debits.

use super::audit::AuditTrail;
use super::database::{Listing, Page, Transaction};
use super::engine::{PaymentEngine, RequestContext};
use super::phase::{AtomicPhase, PhaseOutcome, Saga, partner_failure};
use crate::domain::account::{Account, CreateAccountInput};
use crate::domain::audit::{AuditAction, ResourceType};
use crate::domain::bank::{
    AccountBalance, AccountDetails, BankingPartner, CreateAccountNumberRequest,
    CreateAccountRequest, InboundDebitPolicy, TransactionPage,
};
use crate::domain::idempotency::{
    CachedResponse, ForeignOperation, IdempotencyKey, RecoveryPoint, RequestFingerprint,
};
use crate::domain::ports::Clock;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const ACCOUNTS_PATH: &str = "/v1/accounts";

pub struct AccountService<'a> {
    engine: &'a PaymentEngine,
}

impl<'a> AccountService<'a> {
    pub(super) fn new(engine: &'a PaymentEngine) -> Self {
        Self { engine }
    }

    /// Provisions an account locally and at the partner.
    ///
    /// Retrying with the same `idempotency_key` resumes an interrupted run or
    /// replays the finished response.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        idempotency_key: &str,
        input: CreateAccountInput,
    ) -> Result<CachedResponse> {
        if input.name.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "account name must not be empty".to_string(),
            ));
        }

        let fingerprint = RequestFingerprint::new(
            "POST",
            ACCOUNTS_PATH,
            std::iter::empty::<(String, String)>(),
            &input,
        )?;
        let saga = AccountSaga {
            partner: self.engine.partner.clone(),
            clock: self.engine.clock.clone(),
            audit: self.engine.audit(ctx),
            input,
        };
        self.engine
            .run_saga(ctx, idempotency_key, fingerprint, &saga)
            .await
    }

    pub async fn get(&self, owner: u64, id: u64) -> Result<Account> {
        match self.engine.db.get::<Account>(id).await? {
            Some(account) if account.owner == owner => Ok(account),
            _ => Err(PaymentError::NotFound(format!("account {id}"))),
        }
    }

    pub async fn list(&self, owner: u64, page: &Page) -> Result<Listing<Account>> {
        self.engine
            .db
            .list(page, |account: &Account| account.owner == owner)
            .await
    }

    pub async fn balance(&self, owner: u64, id: u64) -> Result<AccountBalance> {
        let account = self.get(owner, id).await?;
        Ok(self
            .engine
            .partner
            .get_account_balance(account.provisioned_id()?)
            .await?)
    }

    pub async fn details(&self, owner: u64, id: u64) -> Result<AccountDetails> {
        let account = self.get(owner, id).await?;
        Ok(self
            .engine
            .partner
            .get_account_details(account.provisioned_id()?)
            .await?)
    }

    /// Partner-side transactions; the cursor is the partner's own.
    pub async fn transactions(&self, owner: u64, id: u64, page: &Page) -> Result<TransactionPage> {
        let account = self.get(owner, id).await?;
        Ok(self
            .engine
            .partner
            .list_transactions(account.provisioned_id()?, page.limit, page.cursor.as_deref())
            .await?)
    }
}

/// Loads an account the caller owns, as part of `tx`'s read set.
pub(super) async fn owned_account(tx: &mut Transaction, owner: u64, id: u64) -> Result<Account> {
    match tx.load::<Account>(id).await? {
        Some(account) if account.owner == owner => Ok(account),
        _ => Err(PaymentError::NotFound(format!("account {id}"))),
    }
}

struct AccountSaga {
    partner: Arc<dyn BankingPartner>,
    clock: Arc<dyn Clock>,
    audit: AuditTrail,
    input: CreateAccountInput,
}

impl AccountSaga {
    async fn linked_account(&self, tx: &mut Transaction, key: &IdempotencyKey) -> Result<Account> {
        tx.find_by_key(key.id).await?.ok_or_else(|| {
            PaymentError::Invariant(format!(
                "no account linked to idempotency key {} at {}",
                key.id, key.recovery_point
            ))
        })
    }
}

impl Saga for AccountSaga {
    fn name(&self) -> &'static str {
        "account provisioning"
    }

    fn phase(&self, point: RecoveryPoint) -> Option<Box<dyn AtomicPhase + '_>> {
        match point {
            RecoveryPoint::Started => Some(Box::new(CreateLocalAccount(self))),
            RecoveryPoint::AccountCreated => Some(Box::new(OpenBankAccount(self))),
            RecoveryPoint::BankAccountCreated => Some(Box::new(OpenAccountNumber(self))),
            _ => None,
        }
    }
}

struct CreateLocalAccount<'a>(&'a AccountSaga);

#[async_trait]
impl<'a> AtomicPhase for CreateLocalAccount<'a> {
    fn name(&self) -> &'static str {
        "create local account"
    }

    async fn execute(&self, tx: &mut Transaction, key: &IdempotencyKey) -> Result<PhaseOutcome> {
        let saga = self.0;
        if tx.find_by_key::<Account>(key.id).await?.is_none() {
            let account = tx
                .insert(Account::new(key, &saga.input.name, saga.clock.now()))
                .await?;
            saga.audit
                .record(tx, key, AuditAction::CreateAccount, ResourceType::Account, account.id, &account)
                .await?;
        }
        Ok(PhaseOutcome::AdvanceRecoveryPoint(RecoveryPoint::AccountCreated))
    }
}

struct OpenBankAccount<'a>(&'a AccountSaga);

#[async_trait]
impl<'a> AtomicPhase for OpenBankAccount<'a> {
    fn name(&self) -> &'static str {
        "open bank account"
    }

    async fn execute(&self, tx: &mut Transaction, key: &IdempotencyKey) -> Result<PhaseOutcome> {
        let saga = self.0;
        let mut account = saga.linked_account(tx, key).await?;

        if account.bank_account_id.is_none() {
            let token = key.foreign_token(ForeignOperation::OpenAccount);
            info!(account_id = account.id, idempotency_token = %token, "opening bank account");
            let request = CreateAccountRequest {
                name: account.name.clone(),
                idempotency_token: token,
            };
            let created = match saga.partner.create_account(request).await {
                Ok(created) => created,
                Err(err) => return partner_failure(self.name(), err, saga.clock.now()),
            };

            account.bank_account_id = Some(created.id);
            tx.update(&account)?;
            saga.audit
                .record(tx, key, AuditAction::LinkBankAccount, ResourceType::Account, account.id, &account)
                .await?;
        }
        Ok(PhaseOutcome::AdvanceRecoveryPoint(RecoveryPoint::BankAccountCreated))
    }
}

struct OpenAccountNumber<'a>(&'a AccountSaga);

#[async_trait]
impl<'a> AtomicPhase for OpenAccountNumber<'a> {
    fn name(&self) -> &'static str {
        "open account number"
    }

    async fn execute(&self, tx: &mut Transaction, key: &IdempotencyKey) -> Result<PhaseOutcome> {
        let saga = self.0;
        let mut account = saga.linked_account(tx, key).await?;
        let Some(bank_account_id) = account.bank_account_id.clone() else {
            return Err(PaymentError::Invariant(format!(
                "account {} reached {} without a bank account",
                account.id, key.recovery_point
            )));
        };

        if account.bank_account_number_id.is_none() {
            let token = key.foreign_token(ForeignOperation::OpenAccountNumber);
            info!(account_id = account.id, idempotency_token = %token, "opening account number");
            let request = CreateAccountNumberRequest {
                account_id: bank_account_id,
                name: account.name.clone(),
                inbound_debits: InboundDebitPolicy::Blocked,
                idempotency_token: token,
            };
            let created = match saga.partner.create_account_number(request).await {
                Ok(created) => created,
                Err(err) => return partner_failure(self.name(), err, saga.clock.now()),
            };

            account.bank_account_number_id = Some(created.id);
            tx.update(&account)?;
            saga.audit
                .record(tx, key, AuditAction::LinkAccountNumber, ResourceType::Account, account.id, &account)
                .await?;
        }
        Ok(PhaseOutcome::RecordResponse(CachedResponse::new(
            201,
            account.to_body(),
        )))
    }
}
