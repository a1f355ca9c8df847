use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How far a saga has progressed for one idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPoint {
    Started,
    AccountCreated,
    BankAccountCreated,
    TransferCreated,
    PaymentCreated,
    Finished,
}

impl RecoveryPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryPoint::Started => "started",
            RecoveryPoint::AccountCreated => "account_created",
            RecoveryPoint::BankAccountCreated => "bank_account_created",
            RecoveryPoint::TransferCreated => "transfer_created",
            RecoveryPoint::PaymentCreated => "payment_created",
            RecoveryPoint::Finished => "finished",
        }
    }
}

impl fmt::Display for RecoveryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical snapshot of the request that first presented a key.
///
/// Parameters live in a `BTreeMap` and the body is held as a
/// `serde_json::Value` (whose object maps are ordered), so two requests that
/// only differ in argument or field order serialize to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub method: String,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

impl RequestFingerprint {
    pub fn new<I, K, V, B>(method: &str, path: &str, params: I, body: &B) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        B: Serialize + ?Sized,
    {
        Ok(Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            body: serde_json::to_value(body)?,
        })
    }

    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn matches(&self, other: &RequestFingerprint) -> Result<bool> {
        Ok(self.canonical_bytes()? == other.canonical_bytes()?)
    }
}

/// An inbound mutating request as seen by the idempotency layer.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotentRequest {
    pub owner: u64,
    pub key: String,
    pub fingerprint: RequestFingerprint,
}

impl IdempotentRequest {
    pub fn new(owner: u64, key: impl Into<String>, fingerprint: RequestFingerprint) -> Self {
        Self {
            owner,
            key: key.into(),
            fingerprint,
        }
    }
}

/// Response persisted once a saga reaches `Finished`. Replayed verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl CachedResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }
}

/// The foreign side effects a saga may perform, each deduplicated by the
/// partner through a token derived from the idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignOperation {
    OpenAccount,
    OpenAccountNumber,
    SubmitTransfer,
    SubmitPayment,
}

impl ForeignOperation {
    pub fn prefix(&self) -> &'static str {
        match self {
            ForeignOperation::OpenAccount => "acct",
            ForeignOperation::OpenAccountNumber => "acctnum",
            ForeignOperation::SubmitTransfer => "xfer",
            ForeignOperation::SubmitPayment => "pmt",
        }
    }
}

/// Durable record of one logical caller operation, unique per (owner, key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub id: u64,
    pub owner: u64,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub last_run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub recovery_point: RecoveryPoint,
    pub fingerprint: RequestFingerprint,
    pub response: Option<CachedResponse>,
}

impl IdempotencyKey {
    /// A freshly created key is locked by the attempt that created it.
    pub fn new(id: u64, request: &IdempotentRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner: request.owner,
            key: request.key.clone(),
            created_at: now,
            last_run_at: now,
            locked_at: Some(now),
            recovery_point: RecoveryPoint::Started,
            fingerprint: request.fingerprint.clone(),
            response: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.recovery_point == RecoveryPoint::Finished
    }

    /// Whether another attempt still holds the lock at `now`.
    pub fn lock_is_live(&self, now: DateTime<Utc>, lock_timeout: Duration) -> bool {
        self.locked_at
            .is_some_and(|locked_at| now < locked_at + lock_timeout)
    }

    /// Token sent with a foreign call. Keys are only unique per owner, so
    /// the owner is part of the token; the owner id never contains `-`.
    pub fn foreign_token(&self, operation: ForeignOperation) -> String {
        format!("{}-{}-{}", operation.prefix(), self.owner, self.key)
    }

    /// Storage key: owner (big endian) followed by the caller's key.
    pub fn storage_key(owner: u64, key: &str) -> Vec<u8> {
        let mut bytes = owner.to_be_bytes().to_vec();
        bytes.extend_from_slice(key.as_bytes());
        bytes
    }
}
