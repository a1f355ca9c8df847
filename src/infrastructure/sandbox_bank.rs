//! In-process stand-in for the banking partner.
//!
//! Behaves like the real partner where the saga engine cares: resources are
//! created once per idempotency token and replayed afterwards. It also keeps
//! a log of every call and can be told to fail or slow down specific calls.

use crate::domain::bank::{
    AccountBalance, AccountDetails, AccountNumber, BankPayment, BankTransaction, BankTransfer,
    BankingPartner, CreateAccountNumberRequest, CreateAccountRequest, CreatePaymentRequest,
    CreatedResource, InboundDebitPolicy, PartnerError, PartnerResult, RoutingCapabilities,
    SubmittedPayment, SubmittedTransfer, TransactionPage, TransferFundsRequest,
};
use crate::domain::payment::PaymentRail;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

const SANDBOX_ROUTING_NUMBER: &str = "101050001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartnerOperation {
    CreateAccount,
    CreateAccountNumber,
    GetAccountBalance,
    GetAccountDetails,
    TransferFunds,
    GetTransfer,
    RoutingCapabilities,
    CreatePayment,
    GetPayment,
    ListTransactions,
}

/// One call received by the sandbox, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerCall {
    pub operation: PartnerOperation,
    pub idempotency_token: Option<String>,
}

#[derive(Debug, Clone)]
enum Replay {
    Resource(CreatedResource),
    Transfer(SubmittedTransfer),
    Payment(SubmittedPayment),
}

#[derive(Debug, Clone)]
struct SandboxAccount {
    name: String,
    numbers: Vec<AccountNumber>,
    inbound_debits: Option<InboundDebitPolicy>,
}

#[derive(Debug, Default)]
struct SandboxState {
    next_id: u64,
    accounts: BTreeMap<String, SandboxAccount>,
    transfers: BTreeMap<String, BankTransfer>,
    payments: BTreeMap<String, BankPayment>,
    transactions: Vec<BankTransaction>,
    tokens: HashMap<String, Replay>,
    routing: HashMap<String, RoutingCapabilities>,
    faults: VecDeque<(PartnerOperation, PartnerError)>,
    calls: Vec<PartnerCall>,
    latency: Option<Duration>,
}

impl SandboxState {
    fn allocate(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("sandbox_{kind}_{}", self.next_id)
    }

    /// Logs the call and pops the first queued fault for this operation.
    fn enter(
        &mut self,
        operation: PartnerOperation,
        idempotency_token: Option<&str>,
    ) -> PartnerResult<()> {
        self.calls.push(PartnerCall {
            operation,
            idempotency_token: idempotency_token.map(str::to_string),
        });
        match self.faults.iter().position(|(op, _)| *op == operation) {
            Some(index) => match self.faults.remove(index) {
                Some((_, error)) => Err(error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn account(&self, account_id: &str) -> PartnerResult<&SandboxAccount> {
        self.accounts.get(account_id).ok_or_else(|| PartnerError::Rejected {
            status: 404,
            message: format!("account {account_id} not found"),
        })
    }

    fn capabilities(&self, routing_number: &str) -> RoutingCapabilities {
        self.routing
            .get(routing_number)
            .cloned()
            .unwrap_or_else(|| RoutingCapabilities {
                routing_number: routing_number.to_string(),
                real_time_payments: true,
                ach: true,
            })
    }

    fn debit(&mut self, account_id: &str, amount: i64, description: &str) -> String {
        let id = self.allocate("transaction");
        self.transactions.push(BankTransaction {
            id: id.clone(),
            account_id: account_id.to_string(),
            amount: -amount,
            description: description.to_string(),
            created_at: Utc::now(),
        });
        id
    }
}

fn token_reused(token: &str) -> PartnerError {
    PartnerError::Rejected {
        status: 409,
        message: format!("idempotency token {token} was used for a different request"),
    }
}

#[derive(Debug, Default)]
pub struct SandboxBank {
    state: Mutex<SandboxState>,
}

impl SandboxBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next call of `operation` with `error`.
    pub async fn fail_next(&self, operation: PartnerOperation, error: PartnerError) {
        self.state.lock().await.faults.push_back((operation, error));
    }

    /// Makes every resource-creating call wait before answering.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = Some(latency);
    }

    pub async fn set_routing_capabilities(&self, routing_number: &str, real_time_payments: bool, ach: bool) {
        self.state.lock().await.routing.insert(
            routing_number.to_string(),
            RoutingCapabilities {
                routing_number: routing_number.to_string(),
                real_time_payments,
                ach,
            },
        );
    }

    /// Credits an account, e.g. to simulate an inbound wire.
    pub async fn fund(&self, account_id: &str, amount: i64) {
        let mut state = self.state.lock().await;
        let id = state.allocate("transaction");
        state.transactions.push(BankTransaction {
            id,
            account_id: account_id.to_string(),
            amount,
            description: "inbound funding".to_string(),
            created_at: Utc::now(),
        });
    }

    pub async fn calls(&self) -> Vec<PartnerCall> {
        self.state.lock().await.calls.clone()
    }

    /// Tokens seen for `operation`, in arrival order, duplicates included.
    pub async fn tokens_for(&self, operation: PartnerOperation) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .filter_map(|call| call.idempotency_token.clone())
            .collect()
    }

    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    pub async fn transfer_count(&self) -> usize {
        self.state.lock().await.transfers.len()
    }

    pub async fn payment_count(&self) -> usize {
        self.state.lock().await.payments.len()
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BankingPartner for SandboxBank {
    async fn create_account(&self, request: CreateAccountRequest) -> PartnerResult<CreatedResource> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        state.enter(PartnerOperation::CreateAccount, Some(&request.idempotency_token))?;

        if let Some(replay) = state.tokens.get(&request.idempotency_token) {
            return match replay {
                Replay::Resource(resource) => Ok(resource.clone()),
                _ => Err(token_reused(&request.idempotency_token)),
            };
        }

        let id = state.allocate("account");
        state.accounts.insert(
            id.clone(),
            SandboxAccount {
                name: request.name,
                numbers: Vec::new(),
                inbound_debits: None,
            },
        );
        let resource = CreatedResource { id };
        state
            .tokens
            .insert(request.idempotency_token, Replay::Resource(resource.clone()));
        Ok(resource)
    }

    async fn create_account_number(
        &self,
        request: CreateAccountNumberRequest,
    ) -> PartnerResult<CreatedResource> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        state.enter(
            PartnerOperation::CreateAccountNumber,
            Some(&request.idempotency_token),
        )?;

        if let Some(replay) = state.tokens.get(&request.idempotency_token) {
            return match replay {
                Replay::Resource(resource) => Ok(resource.clone()),
                _ => Err(token_reused(&request.idempotency_token)),
            };
        }

        state.account(&request.account_id)?;
        let id = state.allocate("account_number");
        let number = AccountNumber {
            status: "active".to_string(),
            account_number: format!("{:012}", state.next_id),
            routing_number: SANDBOX_ROUTING_NUMBER.to_string(),
        };
        if let Some(account) = state.accounts.get_mut(&request.account_id) {
            account.numbers.push(number);
            account.inbound_debits = Some(request.inbound_debits);
        }

        let resource = CreatedResource { id };
        state
            .tokens
            .insert(request.idempotency_token, Replay::Resource(resource.clone()));
        Ok(resource)
    }

    async fn get_account_balance(&self, account_id: &str) -> PartnerResult<AccountBalance> {
        let mut state = self.state.lock().await;
        state.enter(PartnerOperation::GetAccountBalance, None)?;
        state.account(account_id)?;

        let balance: i64 = state
            .transactions
            .iter()
            .filter(|tx| tx.account_id == account_id)
            .map(|tx| tx.amount)
            .sum();
        Ok(AccountBalance {
            current_balance: balance,
            available_balance: balance,
        })
    }

    async fn get_account_details(&self, account_id: &str) -> PartnerResult<AccountDetails> {
        let mut state = self.state.lock().await;
        state.enter(PartnerOperation::GetAccountDetails, None)?;
        let account = state.account(account_id)?;

        let status = if account.name.is_empty() { "inactive" } else { "active" };
        Ok(AccountDetails {
            status: status.to_string(),
            numbers: account.numbers.clone(),
        })
    }

    async fn transfer_funds(&self, request: TransferFundsRequest) -> PartnerResult<SubmittedTransfer> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        state.enter(PartnerOperation::TransferFunds, Some(&request.idempotency_token))?;

        if let Some(replay) = state.tokens.get(&request.idempotency_token) {
            return match replay {
                Replay::Transfer(transfer) => Ok(transfer.clone()),
                _ => Err(token_reused(&request.idempotency_token)),
            };
        }

        state.account(&request.account_id)?;
        let id = state.allocate("ach_transfer");
        let transaction_id = state.debit(&request.account_id, request.amount, &request.description);
        let transfer = BankTransfer {
            id: id.clone(),
            account_id: request.account_id,
            amount: request.amount,
            description: request.description,
            account_number: request.account_number,
            routing_number: request.routing_number,
            transaction_id: Some(transaction_id.clone()),
            status: "pending_submission".to_string(),
        };
        state.transfers.insert(id.clone(), transfer);

        let submitted = SubmittedTransfer {
            id,
            transaction_id: Some(transaction_id),
            status: "pending_submission".to_string(),
        };
        state
            .tokens
            .insert(request.idempotency_token, Replay::Transfer(submitted.clone()));
        Ok(submitted)
    }

    async fn get_transfer(&self, transfer_id: &str) -> PartnerResult<BankTransfer> {
        let mut state = self.state.lock().await;
        state.enter(PartnerOperation::GetTransfer, None)?;
        state
            .transfers
            .get(transfer_id)
            .cloned()
            .ok_or_else(|| PartnerError::Rejected {
                status: 404,
                message: format!("transfer {transfer_id} not found"),
            })
    }

    async fn routing_capabilities(&self, routing_number: &str) -> PartnerResult<RoutingCapabilities> {
        let mut state = self.state.lock().await;
        state.enter(PartnerOperation::RoutingCapabilities, None)?;
        Ok(state.capabilities(routing_number))
    }

    async fn create_payment(&self, request: CreatePaymentRequest) -> PartnerResult<SubmittedPayment> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        state.enter(PartnerOperation::CreatePayment, Some(&request.idempotency_token))?;

        if let Some(replay) = state.tokens.get(&request.idempotency_token) {
            return match replay {
                Replay::Payment(payment) => Ok(payment.clone()),
                _ => Err(token_reused(&request.idempotency_token)),
            };
        }

        state.account(&request.account_id)?;
        let capabilities = state.capabilities(&request.destination.routing_number);
        let supported = match request.rail {
            PaymentRail::Rtp => capabilities.real_time_payments,
            PaymentRail::Ach => capabilities.ach,
        };
        if !supported {
            return Err(PartnerError::Rejected {
                status: 422,
                message: format!(
                    "routing number {} does not accept {} payments",
                    request.destination.routing_number, request.rail
                ),
            });
        }

        let id = state.allocate(&format!("{}_transfer", request.rail));
        let transaction_id = state.debit(&request.account_id, request.amount, &request.description);
        let status = match request.rail {
            PaymentRail::Rtp => "complete",
            PaymentRail::Ach => "pending_submission",
        };
        state.payments.insert(
            id.clone(),
            BankPayment {
                id: id.clone(),
                account_id: request.account_id,
                amount: request.amount,
                description: request.description,
                rail: request.rail,
                transaction_id: Some(transaction_id.clone()),
                status: status.to_string(),
            },
        );

        let submitted = SubmittedPayment {
            id,
            rail: request.rail,
            transaction_id: Some(transaction_id),
            status: status.to_string(),
        };
        state
            .tokens
            .insert(request.idempotency_token, Replay::Payment(submitted.clone()));
        Ok(submitted)
    }

    async fn get_payment(&self, payment_id: &str, rail: PaymentRail) -> PartnerResult<BankPayment> {
        let mut state = self.state.lock().await;
        state.enter(PartnerOperation::GetPayment, None)?;
        state
            .payments
            .get(payment_id)
            .filter(|payment| payment.rail == rail)
            .cloned()
            .ok_or_else(|| PartnerError::Rejected {
                status: 404,
                message: format!("{rail} transfer {payment_id} not found"),
            })
    }

    async fn list_transactions(
        &self,
        account_id: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> PartnerResult<TransactionPage> {
        let mut state = self.state.lock().await;
        state.enter(PartnerOperation::ListTransactions, None)?;
        state.account(account_id)?;

        let skip = match cursor {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| PartnerError::Rejected {
                status: 400,
                message: format!("invalid cursor {cursor}"),
            })?,
            None => 0,
        };
        let matching: Vec<BankTransaction> = state
            .transactions
            .iter()
            .filter(|tx| tx.account_id == account_id)
            .cloned()
            .collect();
        let limit = limit.unwrap_or(matching.len());
        let transactions: Vec<BankTransaction> =
            matching.iter().skip(skip).take(limit).cloned().collect();
        let consumed = skip + transactions.len();
        let next_cursor = (consumed < matching.len()).then(|| consumed.to_string());

        Ok(TransactionPage {
            transactions,
            next_cursor,
        })
    }
}
