//! Webhook intake tests: signature verification, deduplication, payload
//! validation, and the typed response contract.

mod common;

use common::*;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

// ============ Signature verification ============

#[tokio::test]
async fn valid_paystack_signature_is_processed() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = paystack_payload(&fixture.order.id, "pi_1", "payment_intent.succeeded", 50_000);

    let response = deliver_paystack(&harness.state, "wh_1", &body, TEST_SECRET).await;

    assert!(response.success);
    assert_eq!(response.result_type, WebhookResultType::Processed);

    let order = get_order(&harness.state, &fixture.order.id);
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.paid_at.is_some());

    let log = get_webhook_log(&harness.state, "wh_1");
    assert!(log.signature_valid);
    assert!(log.processed);
    assert_eq!(log.outcome, Some(WebhookOutcome::Success));
    assert_eq!(log.transaction_id.as_deref(), Some("pi_1"));
}

#[tokio::test]
async fn invalid_signature_is_rejected_without_side_effects() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = paystack_payload(&fixture.order.id, "pi_1", "payment_intent.succeeded", 50_000);

    let response = deliver_paystack(&harness.state, "wh_bad", &body, "wrong_secret").await;

    assert!(!response.success);
    assert_eq!(response.result_type, WebhookResultType::InvalidSignature);

    // Order untouched, no receipt, but the rejection was logged.
    let order = get_order(&harness.state, &fixture.order.id);
    assert_eq!(order.status, OrderStatus::PendingPayment);
    let log = get_webhook_log(&harness.state, "wh_bad");
    assert!(!log.signature_valid);
    assert_eq!(log.outcome, Some(WebhookOutcome::ValidationFailed));

    let conn = harness.state.db.get().unwrap();
    assert!(queries::get_receipt_by_order_id(&conn, &fixture.order.id)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = paystack_payload(&fixture.order.id, "pi_1", "payment_intent.succeeded", 50_000);

    let response = process_payment_webhook(&harness.state, "paystack", "wh_nosig", None, &body)
        .await
        .unwrap();

    assert_eq!(response.result_type, WebhookResultType::InvalidSignature);
}

#[tokio::test]
async fn unknown_provider_without_secret_is_rejected() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = mock_payload(&fixture.order.id, "tx_1", "succeeded", 50_000);
    let signature = providers::sign_payload("anything", &body);

    let response =
        process_payment_webhook(&harness.state, "acme-pay", "wh_acme", Some(&signature), &body)
            .await
            .unwrap();

    assert_eq!(response.result_type, WebhookResultType::InvalidSignature);
}

// ============ Duplicate detection ============

#[tokio::test]
async fn duplicate_webhook_id_short_circuits() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = mock_payload(&fixture.order.id, "tx_1", "succeeded", 50_000);

    let first = deliver_mock(&harness.state, "wh_dup", &body).await;
    assert_eq!(first.result_type, WebhookResultType::Processed);

    let second = deliver_mock(&harness.state, "wh_dup", &body).await;
    assert!(second.success);
    assert_eq!(second.result_type, WebhookResultType::Duplicate);

    // Exactly one receipt despite two deliveries.
    let conn = harness.state.db.get().unwrap();
    let receipt_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM receipts WHERE order_id = ?1",
            rusqlite::params![&fixture.order.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(receipt_count, 1);
}

#[tokio::test]
async fn same_transaction_under_new_webhook_id_is_already_processed() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = mock_payload(&fixture.order.id, "tx_1", "succeeded", 50_000);

    deliver_mock(&harness.state, "wh_a", &body).await;
    let second = deliver_mock(&harness.state, "wh_b", &body).await;

    assert!(second.success);
    assert_eq!(second.result_type, WebhookResultType::AlreadyProcessed);
    let receipt_id = second
        .data
        .as_ref()
        .and_then(|d| d.get("receipt_id"))
        .and_then(|v| v.as_str())
        .expect("already_processed carries the receipt id");
    assert_eq!(
        get_receipt_for_order(&harness.state, &fixture.order.id).id,
        receipt_id
    );
}

// ============ Validation outcomes ============

#[tokio::test]
async fn amount_mismatch_is_rejected_and_order_left_pending() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 10_000);
    let body = mock_payload(&fixture.order.id, "tx_1", "succeeded", 9_999);

    let response = deliver_mock(&harness.state, "wh_mismatch", &body).await;

    assert!(!response.success);
    assert_eq!(response.result_type, WebhookResultType::ValidationFailed);
    assert!(response
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("mismatch"));

    let order = get_order(&harness.state, &fixture.order.id);
    assert_eq!(order.status, OrderStatus::PendingPayment);
    let conn = harness.state.db.get().unwrap();
    assert!(queries::get_receipt_by_order_id(&conn, &fixture.order.id)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn cancelled_order_requires_refund() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    {
        let conn = harness.state.db.get().unwrap();
        assert!(queries::cancel_order(&conn, &fixture.order.id).unwrap());
    }
    let body = mock_payload(&fixture.order.id, "tx_1", "succeeded", 50_000);

    let response = deliver_mock(&harness.state, "wh_cancelled", &body).await;

    assert_eq!(response.result_type, WebhookResultType::ValidationFailed);
    let requires_refund = response
        .data
        .as_ref()
        .and_then(|d| d.get("requires_refund"))
        .and_then(|v| v.as_bool());
    assert_eq!(requires_refund, Some(true));
}

#[tokio::test]
async fn unknown_order_is_a_validation_failure() {
    let harness = test_state();
    let body = mock_payload("rd_ord_missing", "tx_1", "succeeded", 50_000);

    let response = deliver_mock(&harness.state, "wh_lost", &body).await;

    assert_eq!(response.result_type, WebhookResultType::ValidationFailed);
}

#[tokio::test]
async fn malformed_payload_is_a_validation_failure() {
    let harness = test_state();

    let response = deliver_mock(&harness.state, "wh_garbage", b"not json at all").await;

    assert_eq!(response.result_type, WebhookResultType::ValidationFailed);
    let log = get_webhook_log(&harness.state, "wh_garbage");
    assert_eq!(log.outcome, Some(WebhookOutcome::ValidationFailed));
}

// ============ Failure and ignored events ============

#[tokio::test]
async fn failed_payment_is_recorded_and_order_flipped() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = mock_payload(&fixture.order.id, "tx_failed", "failed", 50_000);

    let response = deliver_mock(&harness.state, "wh_failed", &body).await;

    assert!(response.success);
    assert_eq!(response.result_type, WebhookResultType::PaymentFailed);

    let order = get_order(&harness.state, &fixture.order.id);
    assert_eq!(order.status, OrderStatus::PaymentFailed);

    let conn = harness.state.db.get().unwrap();
    let txn = queries::get_payment_transaction_by_transaction_id(&conn, "tx_failed")
        .unwrap()
        .expect("failed transaction should be recorded");
    assert_eq!(txn.status, TransactionStatus::Failed);
    assert_eq!(txn.order_id.as_deref(), Some(fixture.order.id.as_str()));
    assert!(txn.failed_at.is_some());

    // The event itself was handled.
    let log = get_webhook_log(&harness.state, "wh_failed");
    assert_eq!(log.outcome, Some(WebhookOutcome::Success));
}

#[tokio::test]
async fn paystack_failure_event_maps_to_failed() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = paystack_payload(
        &fixture.order.id,
        "pi_fail",
        "payment_intent.payment_failed",
        50_000,
    );

    let response = deliver_paystack(&harness.state, "wh_psfail", &body, TEST_SECRET).await;

    assert_eq!(response.result_type, WebhookResultType::PaymentFailed);
    assert_eq!(
        get_order(&harness.state, &fixture.order.id).status,
        OrderStatus::PaymentFailed
    );
}

#[tokio::test]
async fn unhandled_status_is_ignored() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = mock_payload(&fixture.order.id, "tx_other", "refund_requested", 50_000);

    let response = deliver_mock(&harness.state, "wh_other", &body).await;

    assert!(response.success);
    assert_eq!(response.result_type, WebhookResultType::Ignored);
    let log = get_webhook_log(&harness.state, "wh_other");
    assert_eq!(log.outcome, Some(WebhookOutcome::Ignored));
    assert_eq!(
        get_order(&harness.state, &fixture.order.id).status,
        OrderStatus::PendingPayment
    );
}

// ============ HTTP edge ============

#[tokio::test]
async fn http_endpoint_returns_200_with_typed_body() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = mock_payload(&fixture.order.id, "tx_http", "succeeded", 50_000);

    let app = receiptd::handlers::webhooks::router().with_state(harness.state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/payment/mock")
                .header("content-type", "application/json")
                .header("x-webhook-id", "wh_http")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["success"], serde_json::json!(true));
    assert_eq!(parsed["type"], serde_json::json!("processed"));
}

#[tokio::test]
async fn http_endpoint_returns_200_even_for_invalid_signature() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = paystack_payload(&fixture.order.id, "pi_x", "payment_intent.succeeded", 50_000);

    let app = receiptd::handlers::webhooks::router().with_state(harness.state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/payment/paystack")
                .header("content-type", "application/json")
                .header("x-webhook-id", "wh_http_bad")
                .header("x-signature", "deadbeef")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["success"], serde_json::json!(false));
    assert_eq!(parsed["type"], serde_json::json!("invalid_signature"));
}

#[tokio::test]
async fn missing_webhook_id_is_synthesized_uniquely() {
    let harness = test_state();
    let user_store = create_test_order(&harness.state, 50_000);
    let order_b = create_order_for(
        &harness.state,
        &user_store.user,
        &user_store.store,
        50_000,
    );

    let app = receiptd::handlers::webhooks::router().with_state(harness.state.clone());

    // Two deliveries without x-webhook-id must not collide on a synthesized
    // id: both get processed on their own merits.
    for (order_id, txn) in [
        (user_store.order.id.clone(), "tx_syn_a"),
        (order_b.id.clone(), "tx_syn_b"),
    ] {
        let body = mock_payload(&order_id, txn, "succeeded", 50_000);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/payment/mock")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["type"], serde_json::json!("processed"));
    }
}
