mod common;

use common::{account_input, app, ctx, id_of, writes_to, Fault};
use payrail::application::database::Page;
use payrail::domain::account::Amount;
use payrail::domain::audit::{AuditAction, ResourceType};
use payrail::domain::bank::PartnerError;
use payrail::domain::ports::Table;
use payrail::domain::transfer::CreateTransferInput;
use payrail::error::PaymentError;
use payrail::infrastructure::sandbox_bank::PartnerOperation;
use rust_decimal_macros::dec;

fn transfer_input(account_id: u64) -> CreateTransferInput {
    CreateTransferInput {
        account_id,
        amount: Amount::new(dec!(125.50)).unwrap(),
        description: "office rent".to_string(),
        account_number: "000123456789".to_string(),
        routing_number: "021000021".to_string(),
    }
}

#[tokio::test]
async fn test_transfer_end_to_end() {
    let app = app();
    let account_id = app.provisioned_account(1, "acct").await;

    let response = app
        .engine
        .transfers()
        .create(&ctx(1), "t1", transfer_input(account_id))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body["account_id"], account_id);
    assert_eq!(response.body["status"], "pending_submission");

    let details = app.engine.transfers().get(1, id_of(&response)).await.unwrap();
    let bank_transfer = details.bank_transfer.unwrap();
    assert_eq!(bank_transfer.amount, 12550);
    assert_eq!(Some(bank_transfer.id), details.transfer.bank_transfer_id);

    let actions: Vec<AuditAction> = app
        .engine
        .audit_trail(ResourceType::Transfer, details.transfer.id)
        .await
        .unwrap()
        .iter()
        .map(|r| r.action)
        .collect();
    assert_eq!(actions, vec![AuditAction::CreateTransfer, AuditAction::SubmitTransfer]);
}

#[tokio::test]
async fn test_conflict_during_submit_retries_with_one_submission() {
    let app = app();
    let account_id = app.provisioned_account(1, "acct").await;
    app.store.inject(
        3,
        Fault::Conflict,
        writes_to(Table::Transfers, "\"bank_transfer_id\":\"sandbox"),
    );

    let response = app
        .engine
        .transfers()
        .create(&ctx(1), "t1", transfer_input(account_id))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(app.store.injected(), 3);
    assert_eq!(app.bank.transfer_count().await, 1);
    let tokens = app.bank.tokens_for(PartnerOperation::TransferFunds).await;
    assert_eq!(tokens.len(), 4);
    assert!(tokens.iter().all(|token| token == "xfer-1-t1"));

    let transfers = app.engine.transfers().list(1, None, &Page::default()).await.unwrap();
    assert_eq!(transfers.items.len(), 1);
}

#[tokio::test]
async fn test_retry_with_reformatted_amount_replays() {
    let app = app();
    let account_id = app.provisioned_account(1, "acct").await;

    let first = app
        .engine
        .transfers()
        .create(&ctx(1), "t1", transfer_input(account_id))
        .await
        .unwrap();

    let mut reformatted = transfer_input(account_id);
    reformatted.amount = Amount::new(dec!(125.5)).unwrap();
    let retry = app
        .engine
        .transfers()
        .create(&ctx(1), "t1", reformatted)
        .await
        .unwrap();

    assert_eq!(retry, first);
    assert_eq!(app.bank.transfer_count().await, 1);
}

#[tokio::test]
async fn test_unknown_account_is_not_found_and_unlocked() {
    let app = app();

    for _ in 0..2 {
        let err = app
            .engine
            .transfers()
            .create(&ctx(1), "t1", transfer_input(42))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
    }
    assert!(app.bank.calls().await.is_empty());
}

#[tokio::test]
async fn test_other_owners_account_is_not_found() {
    let app = app();
    let account_id = app.provisioned_account(1, "acct").await;

    let err = app
        .engine
        .transfers()
        .create(&ctx(2), "t1", transfer_input(account_id))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_unprovisioned_account_is_bad_request() {
    let app = app();
    app.bank
        .fail_next(
            PartnerOperation::CreateAccount,
            PartnerError::Rejected {
                status: 422,
                message: "name not allowed".to_string(),
            },
        )
        .await;
    let rejected = app
        .engine
        .accounts()
        .create(&ctx(1), "acct", account_input("Acme"))
        .await
        .unwrap();
    assert_eq!(rejected.status, 422);

    let account = app.engine.accounts().list(1, &Page::default()).await.unwrap().items[0].clone();
    let err = app
        .engine
        .transfers()
        .create(&ctx(1), "t1", transfer_input(account.id))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::BadRequest(_)));
    assert_eq!(app.bank.transfer_count().await, 0);
}

#[tokio::test]
async fn test_list_filters_by_account() {
    let app = app();
    let first = app.provisioned_account(1, "a1").await;
    let second = app.provisioned_account(1, "a2").await;

    for (key, account_id) in [("t1", first), ("t2", second), ("t3", first)] {
        app.engine
            .transfers()
            .create(&ctx(1), key, transfer_input(account_id))
            .await
            .unwrap();
    }

    let listing = app
        .engine
        .transfers()
        .list(1, Some(first), &Page::default())
        .await
        .unwrap();
    assert_eq!(listing.items.len(), 2);
    assert!(listing.items.iter().all(|t| t.account_id == first));

    let page = app.engine.transfers().list(1, None, &Page::first(2)).await.unwrap();
    assert_eq!(page.items.len(), 2);
    let rest = app
        .engine
        .transfers()
        .list(
            1,
            None,
            &Page {
                limit: Some(2),
                cursor: page.next_cursor,
            },
        )
        .await
        .unwrap();
    assert_eq!(rest.items.len(), 1);
}
