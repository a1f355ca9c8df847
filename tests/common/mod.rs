#![allow(dead_code)]

use async_trait::async_trait;
use payrail::application::engine::{PaymentEngine, RequestContext};
use payrail::config::EngineConfig;
use payrail::domain::account::CreateAccountInput;
use payrail::domain::idempotency::CachedResponse;
use payrail::domain::ports::{Changeset, KvStore, RecipientDirectory, Table, Versioned};
use payrail::domain::recipient::{BankAddress, Recipient};
use payrail::error::StoreError;
use payrail::infrastructure::clock::ManualClock;
use payrail::infrastructure::in_memory::{InMemoryRecipientDirectory, InMemoryStore};
use payrail::infrastructure::sandbox_bank::SandboxBank;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const FOOD_BANK: u64 = 9;
pub const SHELTER: u64 = 10;
pub const FOOD_BANK_ROUTING: &str = "101050001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Conflict,
    Backend,
}

type Matcher = Box<dyn Fn(&Changeset) -> bool + Send + Sync>;

struct Rule {
    remaining: usize,
    fault: Fault,
    matches: Matcher,
}

/// In-memory store that fails selected commits.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    rules: Mutex<Vec<Rule>>,
    commits: AtomicUsize,
    injected: AtomicUsize,
}

impl FaultyStore {
    /// Fails the next `times` commits accepted by `matches` with `fault`.
    pub fn inject<F>(&self, times: usize, fault: Fault, matches: F)
    where
        F: Fn(&Changeset) -> bool + Send + Sync + 'static,
    {
        self.rules.lock().unwrap().push(Rule {
            remaining: times,
            fault,
            matches: Box::new(matches),
        });
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn fault_for(&self, changes: &Changeset) -> Option<Fault> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .find(|rule| rule.remaining > 0 && (rule.matches)(changes))?;
        rule.remaining -= 1;
        Some(rule.fault)
    }
}

#[async_trait]
impl KvStore for FaultyStore {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Versioned>, StoreError> {
        self.inner.get(table, key).await
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Versioned)>, StoreError> {
        self.inner.scan_prefix(table, prefix).await
    }

    async fn commit(&self, changes: Changeset) -> Result<(), StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        match self.fault_for(&changes) {
            Some(Fault::Conflict) => {
                self.injected.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Conflict("injected conflict".to_string()))
            }
            Some(Fault::Backend) => {
                self.injected.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Backend("injected failure".to_string()))
            }
            None => self.inner.commit(changes).await,
        }
    }
}

/// Matches changesets writing a row of `table` whose JSON contains `needle`.
pub fn writes_to(table: Table, needle: &'static str) -> impl Fn(&Changeset) -> bool + Send + Sync + 'static {
    move |changes: &Changeset| {
        changes
            .writes
            .iter()
            .any(|write| write.table == table && String::from_utf8_lossy(&write.value).contains(needle))
    }
}

pub struct TestApp {
    pub engine: PaymentEngine,
    pub bank: Arc<SandboxBank>,
    pub store: Arc<FaultyStore>,
    pub clock: Arc<ManualClock>,
    pub recipients: Arc<InMemoryRecipientDirectory>,
}

pub fn app() -> TestApp {
    let bank = Arc::new(SandboxBank::new());
    let store = Arc::new(FaultyStore::default());
    let clock = Arc::new(ManualClock::default());
    let recipients = Arc::new(InMemoryRecipientDirectory::new());
    let engine = PaymentEngine::new(
        store.clone(),
        bank.clone(),
        recipients.clone(),
        clock.clone(),
        &EngineConfig::default(),
    );
    TestApp {
        engine,
        bank,
        store,
        clock,
        recipients,
    }
}

pub fn ctx(owner: u64) -> RequestContext {
    RequestContext::new(owner, "198.51.100.7")
}

pub fn account_input(name: &str) -> CreateAccountInput {
    CreateAccountInput {
        name: name.to_string(),
    }
}

pub fn id_of(response: &CachedResponse) -> u64 {
    response.body["id"].as_u64().expect("response carries an id")
}

impl TestApp {
    /// Runs account provisioning to completion and returns the local id.
    pub async fn provisioned_account(&self, owner: u64, key: &str) -> u64 {
        let response = self
            .engine
            .accounts()
            .create(&ctx(owner), key, account_input("Acme"))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        id_of(&response)
    }

    pub async fn seed_recipients(&self) {
        self.recipients
            .insert(Recipient {
                id: FOOD_BANK,
                name: "General Fund".to_string(),
                organization: "Food Bank".to_string(),
                bank_address: Some(BankAddress {
                    account_number: "987654321".to_string(),
                    routing_number: FOOD_BANK_ROUTING.to_string(),
                }),
            })
            .await
            .unwrap();
        self.recipients
            .insert(Recipient {
                id: SHELTER,
                name: "Operations".to_string(),
                organization: "Shelter".to_string(),
                bank_address: None,
            })
            .await
            .unwrap();
    }
}
