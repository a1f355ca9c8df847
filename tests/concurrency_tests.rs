mod common;

use common::{account_input, app, ctx, id_of, writes_to, Fault};
use payrail::application::database::Page;
use payrail::domain::bank::PartnerError;
use payrail::domain::ports::Table;
use payrail::error::{PaymentError, StoreError};
use payrail::infrastructure::sandbox_bank::PartnerOperation;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_requests_with_same_key() {
    let app = app();
    app.bank.set_latency(Duration::from_millis(50)).await;

    let accounts = app.engine.accounts();
    let caller = ctx(1);
    let (left, right) = tokio::join!(
        accounts.create(&caller, "k2", account_input("Acme")),
        accounts.create(&caller, "k2", account_input("Acme")),
    );

    let (winner, loser) = match (left, right) {
        (Ok(response), Err(err)) | (Err(err), Ok(response)) => (response, err),
        other => panic!("expected exactly one request to run, got {other:?}"),
    };
    assert_eq!(winner.status, 201);
    assert!(matches!(loser, PaymentError::OperationInProgress));
    assert_eq!(app.bank.account_count().await, 1);

    let replay = accounts
        .create(&caller, "k2", account_input("Acme"))
        .await
        .unwrap();
    assert_eq!(replay, winner);
}

#[tokio::test]
async fn test_attempt_that_lost_its_lock_stops() {
    let app = app();
    app.bank.set_latency(Duration::from_millis(200)).await;

    let engine = app.engine.clone();
    let stale = tokio::spawn(async move {
        engine
            .accounts()
            .create(&ctx(1), "k1", account_input("Acme"))
            .await
    });

    // Let the first attempt reach the partner call, then let its lock expire.
    tokio::time::sleep(Duration::from_millis(50)).await;
    app.clock.advance(chrono::Duration::minutes(6));

    let response = app
        .engine
        .accounts()
        .create(&ctx(1), "k1", account_input("Acme"))
        .await
        .unwrap();
    assert_eq!(response.status, 201);

    let err = stale.await.unwrap().unwrap_err();
    assert!(matches!(err, PaymentError::OperationInProgress));

    // One call from each attempt, none after the takeover.
    assert_eq!(
        app.bank.tokens_for(PartnerOperation::CreateAccount).await,
        vec!["acct-1-k1", "acct-1-k1"]
    );
    assert_eq!(
        app.bank.tokens_for(PartnerOperation::CreateAccountNumber).await,
        vec!["acctnum-1-k1"]
    );
    assert_eq!(app.bank.account_count().await, 1);

    let replay = app
        .engine
        .accounts()
        .create(&ctx(1), "k1", account_input("Acme"))
        .await
        .unwrap();
    assert_eq!(replay, response);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_run_in_parallel() {
    let app = app();

    let mut handles = Vec::new();
    for n in 0..16 {
        let engine = app.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .accounts()
                .create(&ctx(1), &format!("key-{n}"), account_input(&format!("Org {n}")))
                .await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.status, 201);
        assert!(ids.insert(id_of(&response)));
    }

    assert_eq!(app.bank.account_count().await, 16);
    let listing = app.engine.accounts().list(1, &Page::default()).await.unwrap();
    assert_eq!(listing.items.len(), 16);
}

#[tokio::test]
async fn test_random_failures_converge_to_one_response_per_key() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let app = app();
    let keys = 12;

    for n in 0..keys {
        let key = format!("r{n}");

        if rng.gen_bool(0.5) {
            let operation = if rng.gen_bool(0.5) {
                PartnerOperation::CreateAccount
            } else {
                PartnerOperation::CreateAccountNumber
            };
            app.bank
                .fail_next(operation, PartnerError::Unavailable("timeout".to_string()))
                .await;
        }
        if rng.gen_bool(0.5) {
            app.store.inject(rng.gen_range(1..4), Fault::Conflict, |_| true);
        }
        if rng.gen_bool(0.3) {
            app.store.inject(
                1,
                Fault::Backend,
                writes_to(Table::Accounts, "\"bank_account_id\":\"sandbox"),
            );
        }

        let mut attempts = 0;
        let response = loop {
            attempts += 1;
            assert!(attempts < 10, "key {key} did not converge");
            match app
                .engine
                .accounts()
                .create(&ctx(1), &key, account_input("Acme"))
                .await
            {
                Ok(response) => break response,
                Err(PaymentError::Foreign(PartnerError::Unavailable(_)))
                | Err(PaymentError::Store(StoreError::Backend(_))) => continue,
                Err(other) => panic!("unexpected error for {key}: {other}"),
            }
        };
        assert_eq!(response.status, 201);

        for _ in 0..rng.gen_range(1..4) {
            let replay = app
                .engine
                .accounts()
                .create(&ctx(1), &key, account_input("Acme"))
                .await
                .unwrap();
            assert_eq!(replay, response);
        }
    }

    assert_eq!(app.bank.account_count().await, keys);
    let distinct: HashSet<String> = app
        .bank
        .tokens_for(PartnerOperation::CreateAccount)
        .await
        .into_iter()
        .collect();
    assert_eq!(distinct.len(), keys);
    let listing = app.engine.accounts().list(1, &Page::default()).await.unwrap();
    assert_eq!(listing.items.len(), keys);
}
