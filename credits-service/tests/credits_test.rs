//! Credit ledger over HTTP.

mod common;

use common::{json_body, spawn_app};
use serde_json::json;

#[tokio::test]
async fn cost_quote_rounds_to_whole_credits() {
    let app = spawn_app().await;

    for (minutes, credits) in [(10.0, 13), (5.0, 7), (15.0, 20), (0.1, 1)] {
        let quote = json_body(
            app.client
                .get(format!(
                    "{}/credits/cost?duration_minutes={}",
                    app.address, minutes
                ))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(quote["credits"], credits, "{} minutes", minutes);
    }

    let invalid = app
        .client
        .get(format!("{}/credits/cost?duration_minutes=0", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);
}

#[tokio::test]
async fn debit_updates_balance_and_history() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    let response = app
        .internal_post("/internal/credits/debit", &user_id, json!({
            "amount": 13,
            "session_id": session_id,
            "description": "AI analysis (10 min)"
        }))
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(json_body(response).await["debited"], true);
    assert_eq!(app.balance(&user_id).await, 87);

    let history = json_body(app.get("/credits/transactions", &user_id).send().await.unwrap()).await;
    let transactions = history["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["amount"], -13);
    assert_eq!(transactions[0]["balance_after"], 87);
    assert_eq!(transactions[0]["kind"], "session_analysis");
    assert_eq!(transactions[0]["session_id"], session_id.as_str());

    let session = json_body(
        app.get(&format!("/sessions/{}", session_id), &user_id)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(session["credits_consumed"], 13);
}

#[tokio::test]
async fn overdraw_is_refused_without_side_effects() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    let response = app
        .internal_post(
            "/internal/credits/debit",
            &user_id,
            json!({ "amount": 101, "session_id": session_id }),
        )
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(json_body(response).await["debited"], false);
    assert_eq!(app.balance(&user_id).await, 100);

    let stats = json_body(app.get("/credits/stats", &user_id).send().await.unwrap()).await;
    assert_eq!(stats["transactions_count"], 0);
}

#[tokio::test]
async fn debit_for_unknown_session_is_not_found() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    let response = app
        .internal_post(
            "/internal/credits/debit",
            &user_id,
            json!({ "amount": 5, "session_id": uuid::Uuid::new_v4() }),
        )
        .await;
    assert_eq!(response.status(), 404);
    assert_eq!(app.balance(&user_id).await, 100);
}

#[tokio::test]
async fn non_positive_debit_is_rejected() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    let response = app
        .internal_post(
            "/internal/credits/debit",
            &user_id,
            json!({ "amount": 0, "session_id": session_id }),
        )
        .await;
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn credit_pack_raises_balance_and_total_purchased() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    let response = app
        .internal_post("/internal/credits", &user_id, json!({
            "amount": 50,
            "kind": "credit_pack_purchase",
            "description": "50-credit pack",
            "external_payment_ref": "pi_test_123"
        }))
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(json_body(response).await["balance"], 150);

    let snapshot = json_body(app.get("/credits", &user_id).send().await.unwrap()).await;
    assert_eq!(snapshot["balance"], 150);
    assert_eq!(snapshot["total_purchased"], 50);
    assert_eq!(snapshot["plan"], "trial");

    let bonus = app
        .internal_post("/internal/credits", &user_id, json!({ "amount": 10, "kind": "bonus" }))
        .await;
    assert_eq!(json_body(bonus).await["balance"], 160);

    let snapshot = json_body(app.get("/credits", &user_id).send().await.unwrap()).await;
    assert_eq!(snapshot["total_purchased"], 50);
}

#[tokio::test]
async fn credit_rejects_usage_kind_and_unknown_kinds() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    let usage = app
        .internal_post(
            "/internal/credits",
            &user_id,
            json!({ "amount": 10, "kind": "session_analysis" }),
        )
        .await;
    assert_eq!(usage.status(), 400);

    let unknown = app
        .internal_post("/internal/credits", &user_id, json!({ "amount": 10, "kind": "gift" }))
        .await;
    assert!(unknown.status().is_client_error());
    assert_eq!(app.balance(&user_id).await, 100);
}

#[tokio::test]
async fn check_credits_is_advisory() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    let enough = app.get("/credits/check?required=100", &user_id).send().await.unwrap();
    assert_eq!(json_body(enough).await["sufficient"], true);

    let short = app.get("/credits/check?required=101", &user_id).send().await.unwrap();
    assert_eq!(json_body(short).await["sufficient"], false);

    let negative = app.get("/credits/check?required=-1", &user_id).send().await.unwrap();
    assert_eq!(negative.status(), 400);
}

#[tokio::test]
async fn transactions_are_newest_first_and_limited() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    for amount in [1, 2, 3] {
        app.internal_post(
            "/internal/credits",
            &user_id,
            json!({ "amount": amount, "kind": "adjustment" }),
        )
        .await;
    }

    let page = json_body(
        app.get("/credits/transactions?limit=2", &user_id)
            .send()
            .await
            .unwrap(),
    )
    .await;
    let transactions = page["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["amount"], 3);
    assert_eq!(transactions[1]["amount"], 2);

    let invalid = app
        .get("/credits/transactions?limit=0", &user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);
}

#[tokio::test]
async fn stats_sum_history() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    app.internal_post(
        "/internal/credits/debit",
        &user_id,
        json!({ "amount": 13, "session_id": session_id }),
    )
        .await;
    app.internal_post("/internal/credits", &user_id, json!({ "amount": 20, "kind": "refund" }))
        .await;

    let stats = json_body(app.get("/credits/stats", &user_id).send().await.unwrap()).await;
    assert_eq!(stats["total_consumed"], 13);
    assert_eq!(stats["total_added"], 20);
    assert_eq!(stats["transactions_count"], 2);
    assert!(stats["last_transaction_date"].is_string());
}

#[tokio::test]
async fn concurrent_debits_never_overdraw() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    let attempts = (0..2).map(|_| {
        app.internal_post(
            "/internal/credits/debit",
            &user_id,
            json!({ "amount": 60, "session_id": session_id }),
        )
    });
    let mut debited = 0;
    for response in futures::future::join_all(attempts).await {
        if json_body(response).await["debited"] == true {
            debited += 1;
        }
    }

    assert_eq!(debited, 1);
    assert_eq!(app.balance(&user_id).await, 40);
}
