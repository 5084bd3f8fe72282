//! Payment commit tests: idempotency anchors, snapshot freezing, and
//! receipt number allocation.

mod common;

use common::*;

fn notification(order_id: &str, transaction_id: &str, amount: i64) -> PaymentNotification {
    PaymentNotification {
        transaction_id: transaction_id.to_string(),
        order_id: order_id.to_string(),
        status: "succeeded".to_string(),
        amount,
        currency: "usd".to_string(),
    }
}

#[tokio::test]
async fn commit_creates_receipt_and_seeds_render_queue() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = mock_payload(&fixture.order.id, "tx_1", "succeeded", 50_000);

    deliver_mock(&harness.state, "wh_1", &body).await;

    let receipt = get_receipt_for_order(&harness.state, &fixture.order.id);
    assert_eq!(receipt.status, ReceiptStatus::Pending);
    assert_eq!(receipt.transaction_id, "tx_1");
    assert_eq!(receipt.amount_cents, 50_000);
    assert_eq!(receipt.email_recipient, fixture.user.email);
    assert!(!receipt.pdf_generated);

    // The PAID transition and the receipt were set by one transaction.
    let conn = harness.state.db.get().unwrap();
    let order = queries::get_order_by_id(&conn, &fixture.order.id)
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    let txn = queries::get_payment_transaction_by_transaction_id(&conn, "tx_1")
        .unwrap()
        .unwrap();
    assert_eq!(txn.status, TransactionStatus::Succeeded);
    assert!(txn.succeeded_at.is_some());

    // Exactly one render job was seeded, nothing downstream yet.
    let job = queue::get_job_by_job_id(&conn, &format!("receipt-generation:{}", receipt.id))
        .unwrap()
        .expect("render job should be enqueued");
    assert_eq!(job.queue, "receipt-generation");
    assert_eq!(queue::queue_depth(&conn, "cloudinary-upload").unwrap(), 0);
    assert_eq!(queue::queue_depth(&conn, "email-delivery").unwrap(), 0);
}

#[tokio::test]
async fn order_snapshot_is_frozen_at_commit_time() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let body = mock_payload(&fixture.order.id, "tx_1", "succeeded", 50_000);

    deliver_mock(&harness.state, "wh_1", &body).await;
    let receipt = get_receipt_for_order(&harness.state, &fixture.order.id);

    // Mutate the live order after commit.
    {
        let conn = harness.state.db.get().unwrap();
        conn.execute(
            "UPDATE orders SET total_cents = 1, items = '[]' WHERE id = ?1",
            rusqlite::params![&fixture.order.id],
        )
        .unwrap();
    }

    // The snapshot still carries the state at commit time.
    let conn = harness.state.db.get().unwrap();
    let reread = queries::get_receipt_by_id(&conn, &receipt.id).unwrap().unwrap();
    let snapshot: Order = serde_json::from_value(reread.order_snapshot).unwrap();
    assert_eq!(snapshot.total_cents, 50_000);
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.status, OrderStatus::Paid);
    assert_eq!(snapshot.order_number, fixture.order.order_number);
}

#[tokio::test]
async fn receipt_numbers_are_dense_per_store_and_year() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 10_000);

    let mut numbers = Vec::new();
    for i in 0..3 {
        let order = if i == 0 {
            fixture.order.clone()
        } else {
            create_order_for(&harness.state, &fixture.user, &fixture.store, 10_000)
        };
        let body = mock_payload(&order.id, &format!("tx_{}", i), "succeeded", 10_000);
        deliver_mock(&harness.state, &format!("wh_{}", i), &body).await;
        numbers.push(get_receipt_for_order(&harness.state, &order.id).receipt_number);
    }

    let parsed: Vec<(i32, i64)> = numbers
        .iter()
        .map(|n| parse_receipt_number(n).expect("receipt number should parse"))
        .collect();
    assert_eq!(parsed[0].1, 1);
    assert_eq!(parsed[1].1, 2);
    assert_eq!(parsed[2].1, 3);
    assert!(parsed.iter().all(|(year, _)| *year == parsed[0].0));

    // A different store starts its own sequence.
    let conn = harness.state.db.get().unwrap();
    let other_store = queries::create_store(&conn, "Other Store").unwrap();
    drop(conn);
    let order = create_order_for(&harness.state, &fixture.user, &other_store, 10_000);
    let body = mock_payload(&order.id, "tx_other_store", "succeeded", 10_000);
    deliver_mock(&harness.state, "wh_other_store", &body).await;
    let number = get_receipt_for_order(&harness.state, &order.id).receipt_number;
    assert_eq!(parse_receipt_number(&number).unwrap().1, 1);
}

#[tokio::test]
async fn double_commit_of_same_order_is_a_conflict() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);

    {
        let mut conn = harness.state.db.get().unwrap();
        queries::commit_paid_order(
            &mut conn,
            "mock",
            &notification(&fixture.order.id, "tx_first", 50_000),
            "rd_whk_test",
        )
        .unwrap();
    }

    // A second committer (different transaction id, same order) must fail on
    // the re-read: the order is already PAID.
    let mut conn = harness.state.db.get().unwrap();
    let err = queries::commit_paid_order(
        &mut conn,
        "mock",
        &notification(&fixture.order.id, "tx_second", 50_000),
        "rd_whk_test2",
    )
    .unwrap_err();
    assert!(matches!(err, receiptd::error::AppError::Conflict(_)));

    // Only one transaction row and one receipt survived.
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM payment_transactions WHERE order_id = ?1",
            rusqlite::params![&fixture.order.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
    let receipts: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM receipts WHERE order_id = ?1",
            rusqlite::params![&fixture.order.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(receipts, 1);
}

#[tokio::test]
async fn duplicate_transaction_id_is_a_conflict() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);
    let second_order = create_order_for(&harness.state, &fixture.user, &fixture.store, 50_000);

    {
        let mut conn = harness.state.db.get().unwrap();
        queries::commit_paid_order(
            &mut conn,
            "mock",
            &notification(&fixture.order.id, "tx_shared", 50_000),
            "rd_whk_test",
        )
        .unwrap();
    }

    // Same provider transaction against another order: the unique index on
    // payment_transactions.transaction_id stops it inside the transaction.
    let mut conn = harness.state.db.get().unwrap();
    let err = queries::commit_paid_order(
        &mut conn,
        "mock",
        &notification(&second_order.id, "tx_shared", 50_000),
        "rd_whk_test2",
    )
    .unwrap_err();
    assert!(matches!(err, receiptd::error::AppError::Conflict(_)));

    // The losing order was not promoted (the transaction rolled back).
    let order = queries::get_order_by_id(&conn, &second_order.id)
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::PendingPayment);
}

#[tokio::test]
async fn replayed_failure_event_keeps_first_transaction_row() {
    let harness = test_state();
    let fixture = create_test_order(&harness.state, 50_000);

    for wh in ["wh_f1", "wh_f2"] {
        let body = mock_payload(&fixture.order.id, "tx_fail_replay", "failed", 50_000);
        deliver_mock(&harness.state, wh, &body).await;
    }

    let conn = harness.state.db.get().unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM payment_transactions WHERE transaction_id = 'tx_fail_replay'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
}
