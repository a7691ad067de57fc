//! Application startup and lifecycle management.

use crate::config::{CreditsConfig, StoreConfig, TranscriptionConfig};
use crate::handlers::{
    credits, health_check, metrics_handler, objects, onboarding, patients, readiness_check,
    sessions, storage,
};
use crate::middleware::InternalCallers;
use crate::services::providers::{
    HttpTranscriptionProvider, HttpTranscriptionProviderConfig, MockTranscriptionProvider,
};
use crate::services::{
    init_metrics, AudioService, CreditLedger, CreditStore, InMemoryCreditStore, LocalObjectStore,
    PatientQuotaGuard, PgCreditStore, ProcessingService, SessionService, StorageQuotaGuard,
    TenantService, TranscriptionProvider,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::security_headers::security_headers_middleware;
use service_core::middleware::signature::signature_validation_middleware;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Largest accepted audio upload.
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: CreditsConfig,
    pub store: Arc<dyn CreditStore>,
    pub tenants: TenantService,
    pub ledger: CreditLedger,
    pub storage_quota: StorageQuotaGuard,
    pub patient_quota: PatientQuotaGuard,
    pub sessions: SessionService,
    pub audio: AudioService,
    pub processing: ProcessingService,
    pub objects: Arc<LocalObjectStore>,
    pub provider: Arc<dyn TranscriptionProvider>,
    pub internal_callers: Option<InternalCallers>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the backends named in `config`.
    pub async fn build(config: CreditsConfig) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn CreditStore> = match &config.store {
            StoreConfig::Postgres(db) => {
                let store = PgCreditStore::new(&db.url, db.max_connections, db.min_connections)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                        AppError::from(e)
                    })?;
                store.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    AppError::from(e)
                })?;
                Arc::new(store)
            }
            StoreConfig::Memory => {
                tracing::warn!("Using in-memory store; data is lost on restart");
                Arc::new(InMemoryCreditStore::new())
            }
        };

        let provider: Arc<dyn TranscriptionProvider> = match &config.transcription {
            TranscriptionConfig::Http { endpoint, timeout } => {
                let provider = HttpTranscriptionProvider::new(HttpTranscriptionProviderConfig {
                    endpoint: endpoint.clone(),
                    timeout: *timeout,
                })
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to create transcription provider");
                    AppError::ConfigError(anyhow::anyhow!(
                        "Failed to create transcription provider: {}",
                        e
                    ))
                })?;
                Arc::new(provider)
            }
            TranscriptionConfig::Mock => {
                tracing::info!("Transcription backend not configured - using mock provider");
                Arc::new(MockTranscriptionProvider::new())
            }
        };

        Self::build_with(config, store, provider).await
    }

    /// Build the application over an existing store and provider.
    pub async fn build_with(
        config: CreditsConfig,
        store: Arc<dyn CreditStore>,
        provider: Arc<dyn TranscriptionProvider>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let objects = Arc::new(LocalObjectStore::new(
            config.object_store.path.clone(),
            config.object_store.public_url.clone(),
            config.object_store.signing_secret.clone(),
        ));

        let state = AppState {
            tenants: TenantService::new(store.clone()),
            ledger: CreditLedger::new(store.clone()),
            storage_quota: StorageQuotaGuard::new(store.clone()),
            patient_quota: PatientQuotaGuard::new(store.clone()),
            sessions: SessionService::new(store.clone()),
            audio: AudioService::new(
                store.clone(),
                objects.clone(),
                config.object_store.signed_url_ttl_seconds,
            ),
            processing: ProcessingService::new(store.clone(), objects.clone(), provider.clone()),
            provider,
            internal_callers: config
                .internal_caller
                .clone()
                .map(|caller| InternalCallers::new([caller])),
            objects,
            store,
            config: config.clone(),
        };

        let host: std::net::IpAddr = config.common.host.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Invalid host '{}': {}",
                config.common.host,
                e
            ))
        })?;
        let http_addr = SocketAddr::new(host, config.common.port);
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Credits service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get a reference to the shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);

        tracing::info!(
            service = "credits-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

/// Full HTTP surface.
///
/// Tenant routes authenticate by `X-User-ID`. Balance and storage writers are
/// only mounted under `/internal` and only when an internal caller is configured.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/onboarding", post(onboarding::onboard))
        .route("/professional", get(onboarding::profile))
        .route("/professional/check", get(onboarding::exists))
        .route("/professional/limits", get(onboarding::plan_limits))
        .route("/credits", get(credits::get_balance))
        .route("/credits/check", get(credits::check_credits))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/credits/stats", get(credits::get_stats))
        .route("/credits/cost", get(credits::quote_cost))
        .route("/storage/check", get(storage::check_available))
        .route(
            "/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route("/patients/can-create", get(patients::can_create_patient))
        .route(
            "/patients/:id",
            get(patients::get_patient).delete(patients::deactivate_patient),
        )
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route("/sessions/:id", get(sessions::get_session))
        .route(
            "/sessions/:id/audio",
            put(sessions::upload_audio).delete(sessions::delete_audio),
        )
        .route("/sessions/:id/audio/url", get(sessions::signed_audio_url))
        .route("/sessions/:id/process", post(sessions::process_session))
        .route("/objects/*path", get(objects::download_object));

    if let Some(callers) = state.internal_callers.clone() {
        app = app.merge(internal_router(callers));
    }

    app.layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                    tenant_id = tracing::field::Empty,
                )
            }),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .with_state(state)
}

/// Signed service-to-service writers.
fn internal_router(callers: InternalCallers) -> Router<AppState> {
    Router::new()
        .route("/internal/credits", post(credits::credit))
        .route("/internal/credits/debit", post(credits::debit))
        .route("/internal/storage/reserve", post(storage::reserve))
        .route("/internal/storage/release", post(storage::release))
        .route_layer(middleware::from_fn_with_state(
            callers,
            signature_validation_middleware::<InternalCallers>,
        ))
}
