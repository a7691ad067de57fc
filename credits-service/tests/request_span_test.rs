//! The per-request span carries the caller's identity.

mod common;

use axum::body::Body;
use axum::http::Request;
use common::test_config;
use credits_service::services::providers::MockTranscriptionProvider;
use credits_service::services::InMemoryCreditStore;
use credits_service::startup::{router, Application};
use std::fmt;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tracing::field::{Field, Visit};
use tracing::span::{Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Field names recorded on spans after creation.
#[derive(Clone, Default)]
struct RecordedFields(Arc<Mutex<Vec<String>>>);

struct FieldNames<'a>(&'a mut Vec<String>);

impl Visit for FieldNames<'_> {
    fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
        self.0.push(field.name().to_string());
    }
}

impl<S: Subscriber> Layer<S> for RecordedFields {
    fn on_record(&self, _id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut names = self.0.lock().unwrap();
        values.record(&mut FieldNames(&mut names));
    }
}

#[tokio::test]
async fn caller_ids_are_recorded_on_the_request_span() {
    let recorded = RecordedFields::default();
    let subscriber = tracing_subscriber::registry().with(recorded.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let app = Application::build_with(
        test_config(0),
        Arc::new(InMemoryCreditStore::new()),
        Arc::new(MockTranscriptionProvider::new()),
    )
    .await
    .expect("Failed to build application");
    let routes = router(app.state().clone());

    let onboard = Request::builder()
        .method("POST")
        .uri("/onboarding")
        .header("X-User-ID", "user_span")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"email":"span@example.test"}"#))
        .unwrap();
    let response = routes.clone().oneshot(onboard).await.unwrap();
    assert_eq!(response.status(), 201);

    let balance = Request::builder()
        .uri("/credits")
        .header("X-User-ID", "user_span")
        .body(Body::empty())
        .unwrap();
    let response = routes.oneshot(balance).await.unwrap();
    assert_eq!(response.status(), 200);

    let names = recorded.0.lock().unwrap();
    assert!(names.iter().any(|n| n == "user_id"), "recorded: {:?}", names);
    assert!(names.iter().any(|n| n == "tenant_id"), "recorded: {:?}", names);
}
