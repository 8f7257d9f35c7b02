mod common;

use anyhow::Result;
use chrono::Datelike;
use common::{dec, money, TestApp};
use school_fees_api::auth::Role;
use serde_json::json;

#[tokio::test]
async fn reconcile_reports_gap_and_backfill_repairs_it() -> Result<()> {
    let app = TestApp::spawn().await?;
    app.seed_structures().await?;
    let student = app.students[0];
    let record = app.enroll(student).await?;

    app.store.set_ledger_unavailable(true);
    let (status, body) = app.collect_cash(student, record, 3000).await?;
    assert_eq!(status, 201, "receipt commits even when the ledger is down");
    assert!(body["data"]["ledgerEntry"].is_null());
    app.store.set_ledger_unavailable(false);

    let (_, report) = app.get(Role::Accountant, "/api/ledger/reconcile").await?;
    assert_eq!(report["data"]["consistent"], false);
    assert_eq!(report["data"]["missingReceipts"].as_array().map(Vec::len), Some(1));

    let (status, filled) = app.post(Role::Admin, "/api/ledger/backfill", json!({})).await?;
    assert_eq!(status, 200, "{}", filled);
    assert_eq!(filled["data"]["created"].as_array().map(Vec::len), Some(1));

    let (_, again) = app.post(Role::Admin, "/api/ledger/backfill", json!({})).await?;
    assert_eq!(again["data"]["created"].as_array().map(Vec::len), Some(0));

    let (_, report) = app.get(Role::Accountant, "/api/ledger/reconcile").await?;
    assert_eq!(report["data"]["consistent"], true);
    assert_eq!(money(&report["data"]["receiptsTotal"]), dec(3000));
    Ok(())
}

#[tokio::test]
async fn expenses_are_numbered_and_debited() -> Result<()> {
    let app = TestApp::spawn().await?;
    app.seed_structures().await?;
    let student = app.students[0];
    let record = app.enroll(student).await?;
    app.collect_cash(student, record, 6000).await?;

    let (status, body) = app
        .post(
            Role::Accountant,
            "/api/expenses",
            json!({
                "amount": 1500,
                "category": "Maintenance",
                "paymentMode": "cash",
                "bill": { "contentBase64": "iVBORw0KGgo=", "mimeType": "image/png" }
            }),
        )
        .await?;
    assert_eq!(status, 201, "{}", body);
    let year = chrono::Utc::now().year();
    assert_eq!(body["data"]["expenseNo"], format!("EXP-{}-0001", year));
    let expense_id = body["data"]["id"].as_str().unwrap_or_default().to_string();

    let (_, balance) = app.get(Role::Accountant, "/api/ledger/balance").await?;
    assert_eq!(money(&balance["data"]["credit"]), dec(6000));
    assert_eq!(money(&balance["data"]["debit"]), dec(1500));
    assert_eq!(money(&balance["data"]["balance"]), dec(4500));

    let (status, _) = app
        .post(
            Role::Admin,
            &format!("/api/expenses/{}/cancel", expense_id),
            json!({ "reason": "Entered twice" }),
        )
        .await?;
    assert_eq!(status, 200);

    let (_, balance) = app.get(Role::Accountant, "/api/ledger/balance").await?;
    assert_eq!(money(&balance["data"]["debit"]), dec(0));

    let (_, listed) = app.get(Role::Accountant, "/api/expenses").await?;
    assert_eq!(listed["data"][0]["status"], "cancelled");
    Ok(())
}

#[tokio::test]
async fn ledger_entries_cancel_once() -> Result<()> {
    let app = TestApp::spawn().await?;
    app.seed_structures().await?;
    let student = app.students[0];
    let record = app.enroll(student).await?;
    let (_, body) = app.collect_cash(student, record, 2000).await?;
    let entry = body["data"]["ledgerEntry"]["id"].as_str().unwrap_or_default().to_string();

    let path = format!("/api/ledger/{}/cancel", entry);
    let (status, body) = app.post(Role::Admin, &path, json!({ "reason": "Posted in error" })).await?;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["status"], "cancelled");

    let (status, _) = app.post(Role::Admin, &path, json!({ "reason": "again" })).await?;
    assert_eq!(status, 409);
    Ok(())
}

#[tokio::test]
async fn ledger_entry_is_readable_by_id() -> Result<()> {
    let app = TestApp::spawn().await?;
    app.seed_structures().await?;
    let student = app.students[0];
    let record = app.enroll(student).await?;
    let (_, body) = app.collect_cash(student, record, 1500).await?;
    let entry = body["data"]["ledgerEntry"]["id"].as_str().unwrap_or_default().to_string();
    let path = format!("/api/ledger/{}", entry);

    let (status, body) = app.get(Role::Accountant, &path).await?;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["id"], entry.as_str());
    assert_eq!(body["data"]["transactionType"], "CREDIT");
    assert_eq!(money(&body["data"]["amount"]), dec(1500));

    let (status, _) = app.get(Role::Teacher, &path).await?;
    assert_eq!(status, 403);

    let missing = format!("/api/ledger/{}", uuid::Uuid::new_v4());
    let (status, _) = app.get(Role::Accountant, &missing).await?;
    assert_eq!(status, 404);
    Ok(())
}
