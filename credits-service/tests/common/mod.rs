//! Common test utilities for credits-service integration tests.

#![allow(dead_code)]

use credits_service::config::{
    CreditsConfig, InternalCallerConfig, ObjectStoreConfig, StoreConfig, TranscriptionConfig,
};
use credits_service::services::providers::MockTranscriptionProvider;
use credits_service::services::InMemoryCreditStore;
use credits_service::startup::Application;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use service_core::utils::sign_request;
use std::sync::{Arc, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

pub const INTERNAL_CLIENT_ID: &str = "billing-worker";
pub const INTERNAL_SECRET: &str = "internal-integration-secret";

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,credits_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub store: Arc<InMemoryCreditStore>,
    pub provider: Arc<MockTranscriptionProvider>,
}

impl TestApp {
    pub fn get(&self, path: &str, user_id: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id)
    }

    pub fn post(&self, path: &str, user_id: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id)
    }

    pub fn put(&self, path: &str, user_id: &str) -> RequestBuilder {
        self.client
            .put(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id)
    }

    pub fn delete(&self, path: &str, user_id: &str) -> RequestBuilder {
        self.client
            .delete(format!("{}{}", self.address, path))
            .header("X-User-ID", user_id)
    }

    /// POST signed as the configured internal caller, with a fresh nonce.
    pub async fn internal_post(&self, path: &str, user_id: &str, body: Value) -> Response {
        let nonce = Uuid::new_v4().to_string();
        self.signed_post(path, user_id, &body, INTERNAL_SECRET, &nonce)
            .send()
            .await
            .expect("Failed to send internal request")
    }

    /// POST carrying an HMAC signature made with `secret`.
    pub fn signed_post(
        &self,
        path: &str,
        user_id: &str,
        body: &Value,
        secret: &str,
        nonce: &str,
    ) -> RequestBuilder {
        let body = body.to_string();
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign_request(secret, "POST", path, timestamp, nonce, body.as_bytes())
            .expect("Failed to sign request");

        self.post(path, user_id)
            .header("content-type", "application/json")
            .header("X-Client-ID", INTERNAL_CLIENT_ID)
            .header("X-Timestamp", timestamp.to_string())
            .header("X-Nonce", nonce)
            .header("X-Signature", signature)
            .body(body)
    }

    /// Onboard a fresh trial tenant and return its external user id.
    pub async fn onboard(&self) -> String {
        let user_id = format!("user_{}", Uuid::new_v4().simple());
        let response = self
            .post("/onboarding", &user_id)
            .json(&json!({ "email": format!("{}@example.test", user_id) }))
            .send()
            .await
            .expect("Failed to onboard");
        assert_eq!(response.status(), 201);
        user_id
    }

    pub async fn balance(&self, user_id: &str) -> i64 {
        let body = json_body(self.get("/credits", user_id).send().await.unwrap()).await;
        body["balance"].as_i64().expect("balance")
    }

    /// Create a patient and a session for it. Returns the session id.
    pub async fn create_session(&self, user_id: &str) -> String {
        let patient = json_body(
            self.post("/patients", user_id)
                .json(&json!({ "name": "Test Patient" }))
                .send()
                .await
                .unwrap(),
        )
        .await;

        let session = json_body(
            self.post("/sessions", user_id)
                .json(&json!({
                    "patient_id": patient["patient_id"],
                    "session_date": "2026-10-18",
                    "duration_minutes": 50
                }))
                .send()
                .await
                .unwrap(),
        )
        .await;
        session["session_id"].as_str().expect("session_id").to_string()
    }

    /// Upload `bytes` of audio lasting `duration_seconds` to a session.
    pub async fn upload_audio(
        &self,
        user_id: &str,
        session_id: &str,
        bytes: Vec<u8>,
        duration_seconds: i32,
    ) -> Response {
        self.put(
            &format!(
                "/sessions/{}/audio?file_name=session.mp3&duration_seconds={}",
                session_id, duration_seconds
            ),
            user_id,
        )
        .header("content-type", "audio/mpeg")
        .body(bytes)
        .send()
        .await
        .expect("Failed to upload audio")
    }
}

pub async fn json_body(response: Response) -> Value {
    response.json().await.expect("Response was not JSON")
}

/// In-memory, mock-provider configuration listening on `port`.
pub fn test_config(port: u16) -> CreditsConfig {
    CreditsConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port,
        },
        service_name: "credits-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        store: StoreConfig::Memory,
        object_store: ObjectStoreConfig {
            path: std::env::temp_dir().join(format!("credits-it-{}", Uuid::new_v4())),
            public_url: format!("http://127.0.0.1:{}/objects", port),
            signing_secret: "integration-secret".to_string(),
            signed_url_ttl_seconds: 3600,
        },
        transcription: TranscriptionConfig::Mock,
        internal_caller: Some(InternalCallerConfig {
            client_id: INTERNAL_CLIENT_ID.to_string(),
            signing_secret: INTERNAL_SECRET.to_string(),
        }),
    }
}

/// Spawn the service on a random port over a fresh in-memory store.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Like [`spawn_app`], with a chance to adjust the configuration first.
pub async fn spawn_app_with(customize: impl FnOnce(&mut CreditsConfig)) -> TestApp {
    init_tracing();

    // Signed URLs must point at the real port, so pick it up front.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("Failed to reserve a port")
        .port();

    let mut config = test_config(port);
    customize(&mut config);

    let store = Arc::new(InMemoryCreditStore::new());
    let provider = Arc::new(MockTranscriptionProvider::new());

    let app = Application::build_with(config, store.clone(), provider.clone())
        .await
        .expect("Failed to build application");
    let address = format!("http://127.0.0.1:{}", app.http_port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = Client::new();

    // Wait for server to be ready with retry
    let mut attempts = 0;
    loop {
        match client.get(format!("{}/health", address)).send().await {
            Ok(_) => break,
            Err(_) if attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }
            Err(e) => panic!("Service not ready after 20 attempts: {}", e),
        }
    }

    TestApp {
        address,
        client,
        store,
        provider,
    }
}

/// Decimal MB fields serialize as strings; compare them numerically.
pub fn mb(value: &Value) -> f64 {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("MB value should be a decimal string")
}
