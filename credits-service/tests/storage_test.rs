//! Storage quota over HTTP.

mod common;

use common::{json_body, mb, spawn_app};
use serde_json::json;

#[tokio::test]
async fn check_reports_availability_at_the_boundary() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    app.internal_post("/internal/storage/reserve", &user_id, json!({ "file_size_mb": "12.5" }))
        .await;

    let exact = json_body(
        app.get("/storage/check?file_size_mb=37.5", &user_id)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(exact["can_upload"], true);
    assert_eq!(mb(&exact["current_mb"]), 12.5);
    assert_eq!(mb(&exact["available_mb"]), 37.5);

    let over = json_body(
        app.get("/storage/check?file_size_mb=37.51", &user_id)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(over["can_upload"], false);
}

#[tokio::test]
async fn reserve_over_ceiling_is_forbidden() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    let first = app
        .internal_post("/internal/storage/reserve", &user_id, json!({ "file_size_mb": "48" }))
        .await;
    assert_eq!(first.status(), 200);
    assert_eq!(mb(&json_body(first).await["current_mb"]), 48.0);

    let second = app
        .internal_post("/internal/storage/reserve", &user_id, json!({ "file_size_mb": "5" }))
        .await;
    assert_eq!(second.status(), 403);

    let status = json_body(
        app.get("/storage/check?file_size_mb=0", &user_id)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(mb(&status["current_mb"]), 48.0);
}

#[tokio::test]
async fn release_floors_at_zero() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    app.internal_post("/internal/storage/reserve", &user_id, json!({ "file_size_mb": "5" }))
        .await;

    let released = app
        .internal_post("/internal/storage/release", &user_id, json!({ "file_size_mb": "10" }))
        .await;
    assert_eq!(released.status(), 200);
    assert_eq!(mb(&json_body(released).await["current_mb"]), 0.0);
}

#[tokio::test]
async fn negative_sizes_are_bad_requests() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;

    let response = app
        .internal_post("/internal/storage/reserve", &user_id, json!({ "file_size_mb": "-1" }))
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn upload_and_delete_audio_track_usage() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    // 2 MiB
    let response = app
        .upload_audio(&user_id, &session_id, vec![0u8; 2 * 1_048_576], 600)
        .await;
    assert_eq!(response.status(), 201);
    let uploaded = json_body(response).await;
    assert_eq!(mb(&uploaded["file_size_mb"]), 2.0);
    let storage_path = uploaded["storage_path"].as_str().unwrap();
    assert!(storage_path.starts_with(&format!("{}/{}/", user_id, session_id)));
    assert!(storage_path.ends_with(".mp3"));

    let limits = json_body(app.get("/professional/limits", &user_id).send().await.unwrap()).await;
    assert_eq!(mb(&limits["storage_used_mb"]), 2.0);

    let deleted = app
        .delete(&format!("/sessions/{}/audio", session_id), &user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);
    assert_eq!(mb(&json_body(deleted).await["released_mb"]), 2.0);

    let limits = json_body(app.get("/professional/limits", &user_id).send().await.unwrap()).await;
    assert_eq!(mb(&limits["storage_used_mb"]), 0.0);
}

#[tokio::test]
async fn upload_over_quota_stores_nothing() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    app.internal_post("/internal/storage/reserve", &user_id, json!({ "file_size_mb": "49.5" }))
        .await;

    let response = app
        .upload_audio(&user_id, &session_id, vec![0u8; 1_048_576], 60)
        .await;
    assert_eq!(response.status(), 403);

    let session = json_body(
        app.get(&format!("/sessions/{}", session_id), &user_id)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert!(session["audio_storage_path"].is_null());
}

#[tokio::test]
async fn non_audio_upload_is_rejected() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    let response = app
        .put(&format!("/sessions/{}/audio", session_id), &user_id)
        .header("content-type", "application/pdf")
        .body(vec![1u8, 2, 3])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn concurrent_uploads_to_one_session_keep_a_single_reservation() {
    let app = spawn_app().await;
    let user_id = app.onboard().await;
    let session_id = app.create_session(&user_id).await;

    let (a, b) = tokio::join!(
        app.upload_audio(&user_id, &session_id, vec![0u8; 1_048_576], 60),
        app.upload_audio(&user_id, &session_id, vec![0u8; 1_048_576], 60),
    );
    let mut statuses = [a.status().as_u16(), b.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, [201, 409]);

    let limits = json_body(app.get("/professional/limits", &user_id).send().await.unwrap()).await;
    assert_eq!(mb(&limits["storage_used_mb"]), 1.0);

    let deleted = app
        .delete(&format!("/sessions/{}/audio", session_id), &user_id)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let limits = json_body(app.get("/professional/limits", &user_id).send().await.unwrap()).await;
    assert_eq!(mb(&limits["storage_used_mb"]), 0.0);
}
