use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Sign a service-to-service request.
///
/// Format: hex(HMAC-SHA256(method|path|timestamp|nonce|sha256(body), secret))
pub fn sign_request(
    secret: &str,
    method: &str,
    path: &str,
    timestamp: i64,
    nonce: &str,
    body: &[u8],
) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    let body_hash = hex::encode(Sha256::digest(body));
    let payload = format!("{}|{}|{}|{}|{}", method, path, timestamp, nonce, body_hash);

    mac.update(payload.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a request signature using constant-time comparison
pub fn verify_request(
    secret: &str,
    method: &str,
    path: &str,
    timestamp: i64,
    nonce: &str,
    body: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = sign_request(secret, method, path, timestamp, nonce, body)?;
    Ok(constant_time_eq(&expected, signature))
}

fn constant_time_eq(expected: &str, given: &str) -> bool {
    let expected_bytes = expected.as_bytes();
    let given_bytes = given.as_bytes();

    if expected_bytes.len() != given_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(given_bytes).into()
}

/// Sign an object path for time-limited access.
///
/// Format: hex(HMAC-SHA256(path|expires_at, secret))
pub fn sign_object_path(secret: &str, path: &str, expires_at: i64) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(format!("{}|{}", path, expires_at).as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signed object path. Expired links never verify.
pub fn verify_object_path(
    secret: &str,
    path: &str,
    expires_at: i64,
    now: i64,
    signature: &str,
) -> Result<bool, anyhow::Error> {
    if now > expires_at {
        return Ok(false);
    }

    let expected = sign_object_path(secret, path, expires_at)?;
    Ok(constant_time_eq(&expected, signature))
}
