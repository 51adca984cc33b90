use super::models::User;
use super::{ApiClient, ApiError};
use base64::Engine;

/// Authentication endpoints, behind a trait so the session monitor can be
/// driven without a live server
pub trait AuthApi: Send + Sync {
    fn login(&self, email: &str, password: &str) -> Result<User, ApiError>;
    fn logout(&self, token: &str) -> Result<(), ApiError>;
}

impl AuthApi for ApiClient {
    fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let value = self.post("/users/login", Some(&body), None)?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn logout(&self, token: &str) -> Result<(), ApiError> {
        self.post("/users/logout", None, Some(token))?;
        Ok(())
    }
}

/// The login endpoint returns no credential, so the bearer token is derived
/// from the user identity
pub fn session_token(user: &User) -> String {
    let payload = serde_json::json!({ "email": user.email, "id": user.id });
    base64::engine::general_purpose::STANDARD.encode(payload.to_string())
}
