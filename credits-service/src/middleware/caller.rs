use crate::models::Tenant;
use crate::startup::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

/// Header carrying the identity provider's user id, set by the trusted front-end.
pub const USER_ID_HEADER: &str = "X-User-ID";

/// Caller identity from the `X-User-ID` header.
///
/// Rejects with 401 when the header is missing or blank.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header"))
            })?;

        tracing::Span::current().record("user_id", user_id);

        Ok(UserId(user_id.to_string()))
    }
}

/// The caller's tenant. 401 without identity, 404 without a tenant row.
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub Tenant);

#[async_trait]
impl FromRequestParts<AppState> for CurrentTenant {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok());

        let tenant = state.tenants.resolve_caller(user_id).await?;
        tracing::Span::current().record("tenant_id", tracing::field::display(tenant.tenant_id));

        Ok(CurrentTenant(tenant))
    }
}
