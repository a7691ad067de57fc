use crate::error::AppError;
use crate::utils::signature::verify_request;
use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

pub const CLIENT_ID_HEADER: &str = "X-Client-ID";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const NONCE_HEADER: &str = "X-Nonce";
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Allowed clock skew between caller and service, in seconds.
pub const SIGNATURE_WINDOW_SECONDS: i64 = 60;

const MAX_SIGNED_BODY_BYTES: usize = 1024 * 1024;

/// Source of caller secrets and replay state for signed requests.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Returns `false` if the nonce was already seen inside the window.
    async fn validate_nonce(&self, nonce: &str, timestamp: i64) -> Result<bool, AppError>;
    async fn get_signing_secret(&self, client_id: &str) -> Result<Option<String>, AppError>;
}

/// Rejects any request that does not carry a valid HMAC signature.
///
/// Mount with `route_layer` on routers that only other services may call.
pub async fn signature_validation_middleware<S>(
    State(state): State<S>,
    req: Request,
    next: Next,
) -> Result<Response, AppError>
where
    S: SignatureStore + Clone + Send + Sync + 'static,
{
    let (client_id, timestamp_str, nonce, signature) = extract_auth_data(req.headers())?;

    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid timestamp format")))?;

    let now = chrono::Utc::now().timestamp();
    if (now - timestamp).abs() > SIGNATURE_WINDOW_SECONDS {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Request timestamp expired"
        )));
    }

    let secret = state
        .get_signing_secret(&client_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid Client ID")))?;

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_SIGNED_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Failed to read body: {}", e)))?;

    let is_valid = verify_request(
        &secret,
        parts.method.as_str(),
        parts.uri.path(),
        timestamp,
        &nonce,
        &bytes,
        &signature,
    )
    .map_err(|e| AppError::InternalError(anyhow::anyhow!("Signature verification error: {}", e)))?;

    if !is_valid {
        tracing::warn!(client_id = %client_id, path = %parts.uri.path(), "Rejected signed request");
        return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid signature")));
    }

    // Only burn the nonce once the signature proves the caller owns it.
    if !state.validate_nonce(&nonce, timestamp).await? {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Replay detected (nonce used)"
        )));
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}

fn extract_auth_data(headers: &HeaderMap) -> Result<(String, String, String, String), AppError> {
    let client_id = get_header(headers, CLIENT_ID_HEADER)?;
    let timestamp = get_header(headers, TIMESTAMP_HEADER)?;
    let nonce = get_header(headers, NONCE_HEADER)?;
    let signature = get_header(headers, SIGNATURE_HEADER)?;
    Ok((client_id, timestamp, nonce, signature))
}

fn get_header(headers: &HeaderMap, key: &str) -> Result<String, AppError> {
    headers
        .get(key)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing header: {}", key)))?
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid header format: {}", key)))
}
