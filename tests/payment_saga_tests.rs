mod common;

use common::{app, ctx, id_of, writes_to, Fault, FOOD_BANK, FOOD_BANK_ROUTING, SHELTER};
use payrail::application::database::Page;
use payrail::application::payments::PaymentFilter;
use payrail::domain::account::Amount;
use payrail::domain::payment::{CreatePaymentInput, PaymentRail};
use payrail::domain::ports::Table;
use payrail::error::PaymentError;
use payrail::infrastructure::sandbox_bank::PartnerOperation;
use rust_decimal_macros::dec;

fn payment_input(account_id: u64, recipient_id: u64) -> CreatePaymentInput {
    CreatePaymentInput {
        account_id,
        recipient_id,
        amount: Amount::new(dec!(40)).unwrap(),
        description: "monthly grant".to_string(),
    }
}

#[tokio::test]
async fn test_payment_prefers_real_time_rail() {
    let app = app();
    app.seed_recipients().await;
    let account_id = app.provisioned_account(1, "acct").await;

    let response = app
        .engine
        .payments()
        .create(&ctx(1), "p1", payment_input(account_id, FOOD_BANK))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body["payment_rail"], "rtp");
    assert_eq!(response.body["status"], "complete");

    let details = app.engine.payments().get(1, id_of(&response)).await.unwrap();
    let bank_payment = details.bank_payment.unwrap();
    assert_eq!(bank_payment.rail, PaymentRail::Rtp);
    assert_eq!(bank_payment.amount, 4000);
    assert_eq!(app.bank.tokens_for(PartnerOperation::CreatePayment).await, vec!["pmt-1-p1"]);
}

#[tokio::test]
async fn test_payment_falls_back_to_ach() {
    let app = app();
    app.seed_recipients().await;
    app.bank.set_routing_capabilities(FOOD_BANK_ROUTING, false, true).await;
    let account_id = app.provisioned_account(1, "acct").await;

    let response = app
        .engine
        .payments()
        .create(&ctx(1), "p1", payment_input(account_id, FOOD_BANK))
        .await
        .unwrap();

    assert_eq!(response.body["payment_rail"], "ach");
    assert_eq!(response.body["status"], "pending_submission");
}

#[tokio::test]
async fn test_no_supported_rail_is_bad_request_and_resumable() {
    let app = app();
    app.seed_recipients().await;
    app.bank.set_routing_capabilities(FOOD_BANK_ROUTING, false, false).await;
    let account_id = app.provisioned_account(1, "acct").await;

    let err = app
        .engine
        .payments()
        .create(&ctx(1), "p1", payment_input(account_id, FOOD_BANK))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::BadRequest(_)));
    assert_eq!(app.bank.payment_count().await, 0);

    // Nothing was cached, so the same key succeeds once the destination
    // starts accepting ACH.
    app.bank.set_routing_capabilities(FOOD_BANK_ROUTING, false, true).await;
    let response = app
        .engine
        .payments()
        .create(&ctx(1), "p1", payment_input(account_id, FOOD_BANK))
        .await
        .unwrap();
    assert_eq!(response.body["payment_rail"], "ach");

    let payments = app
        .engine
        .payments()
        .list(1, PaymentFilter::default(), &Page::default())
        .await
        .unwrap();
    assert_eq!(payments.items.len(), 1);
}

#[tokio::test]
async fn test_recipient_checks() {
    let app = app();
    app.seed_recipients().await;
    let account_id = app.provisioned_account(1, "acct").await;

    let missing = app
        .engine
        .payments()
        .create(&ctx(1), "p1", payment_input(account_id, 404))
        .await
        .unwrap_err();
    assert!(matches!(missing, PaymentError::NotFound(_)));

    let no_address = app
        .engine
        .payments()
        .create(&ctx(1), "p2", payment_input(account_id, SHELTER))
        .await
        .unwrap_err();
    assert!(matches!(no_address, PaymentError::BadRequest(_)));
    assert!(app.bank.tokens_for(PartnerOperation::CreatePayment).await.is_empty());
}

#[tokio::test]
async fn test_payment_submission_is_deduplicated_across_conflicts() {
    let app = app();
    app.seed_recipients().await;
    let account_id = app.provisioned_account(1, "acct").await;
    app.store.inject(
        2,
        Fault::Conflict,
        writes_to(Table::Payments, "\"bank_transfer_id\":\"sandbox"),
    );

    let response = app
        .engine
        .payments()
        .create(&ctx(1), "p1", payment_input(account_id, FOOD_BANK))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(app.bank.payment_count().await, 1);
    assert_eq!(
        app.bank.tokens_for(PartnerOperation::CreatePayment).await,
        vec!["pmt-1-p1", "pmt-1-p1", "pmt-1-p1"]
    );
}

#[tokio::test]
async fn test_list_filters_by_recipient() {
    let app = app();
    app.seed_recipients().await;
    let first = app.provisioned_account(1, "a1").await;
    let second = app.provisioned_account(1, "a2").await;

    app.engine
        .payments()
        .create(&ctx(1), "p1", payment_input(first, FOOD_BANK))
        .await
        .unwrap();
    app.engine
        .payments()
        .create(&ctx(1), "p2", payment_input(second, FOOD_BANK))
        .await
        .unwrap();

    let by_account = app
        .engine
        .payments()
        .list(
            1,
            PaymentFilter {
                account_id: Some(second),
                recipient_id: None,
            },
            &Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_account.items.len(), 1);

    let by_recipient = app
        .engine
        .payments()
        .list(
            1,
            PaymentFilter {
                account_id: None,
                recipient_id: Some(FOOD_BANK),
            },
            &Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_recipient.items.len(), 2);

    let other_owner = app
        .engine
        .payments()
        .list(2, PaymentFilter::default(), &Page::default())
        .await
        .unwrap();
    assert!(other_owner.items.is_empty());
}
