//! Balance and storage writers are reachable only by signed internal callers.

mod common;

use common::{json_body, mb, spawn_app, spawn_app_with, INTERNAL_SECRET};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn tenant_cannot_mint_credits_or_move_storage() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    let mint = app
        .post("/credits", &user_id)
        .json(&json!({ "amount": 1000000, "kind": "bonus" }))
        .send()
        .await
        .unwrap();
    assert_eq!(mint.status(), 405);

    let debit = app
        .post("/credits/debit", &user_id)
        .json(&json!({ "amount": 5, "session_id": session_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(debit.status(), 404);

    for path in ["/storage/reserve", "/storage/release"] {
        let response = app
            .post(path, &user_id)
            .json(&json!({ "file_size_mb": "10" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404, "{}", path);
    }

    assert_eq!(app.balance(&user_id).await, 100);
    let limits = json_body(app.get("/professional/limits", &user_id).send().await.unwrap()).await;
    assert_eq!(mb(&limits["storage_used_mb"]), 0.0);
}

#[tokio::test]
async fn unsigned_internal_call_is_unauthorized() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    let response = app
        .post("/internal/credits", &user_id)
        .json(&json!({ "amount": 50, "kind": "bonus" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(app.balance(&user_id).await, 100);
}

#[tokio::test]
async fn wrong_secret_is_unauthorized() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    let response = app
        .signed_post(
            "/internal/credits",
            &user_id,
            &json!({ "amount": 50, "kind": "bonus" }),
            "not-the-secret",
            &Uuid::new_v4().to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(app.balance(&user_id).await, 100);
}

#[tokio::test]
async fn signature_is_bound_to_the_body() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    let signed_for_small = app.signed_post(
        "/internal/credits",
        &user_id,
        &json!({ "amount": 5, "kind": "bonus" }),
        INTERNAL_SECRET,
        &Uuid::new_v4().to_string(),
    );
    let response = signed_for_small
        .body(json!({ "amount": 5000, "kind": "bonus" }).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(app.balance(&user_id).await, 100);
}

#[tokio::test]
async fn replayed_request_is_applied_once() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let nonce = Uuid::new_v4().to_string();
    let body = json!({ "amount": 25, "kind": "bonus" });

    let first = app
        .signed_post("/internal/credits", &user_id, &body, INTERNAL_SECRET, &nonce)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let replay = app
        .signed_post("/internal/credits", &user_id, &body, INTERNAL_SECRET, &nonce)
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 401);
    assert_eq!(app.balance(&user_id).await, 125);
}

#[tokio::test]
async fn internal_routes_are_absent_without_a_configured_caller() {
    let app = spawn_app_with(|config| config.internal_caller = None).await;
    let user_id = app.onboard().await;

    let response = app
        .internal_post(
            "/internal/credits",
            &user_id,
            json!({ "amount": 25, "kind": "bonus" }),
        )
        .await;
    assert_eq!(response.status(), 404);
    assert_eq!(app.balance(&user_id).await, 100);
}
