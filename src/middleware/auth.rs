use actix_web::error::ErrorUnauthorized;
use actix_web::{Error, HttpRequest};

/// Check the `Authorization: Bearer <token>` header against the configured
/// webhook token. Requests pass when no token is configured.
pub fn verify_webhook_token(req: &HttpRequest, expected: Option<&str>) -> Result<(), Error> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ErrorUnauthorized("Missing authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ErrorUnauthorized("Invalid authorization format"))?;

    if token != expected {
        return Err(ErrorUnauthorized("Invalid webhook token"));
    }

    Ok(())
}
