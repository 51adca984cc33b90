//! Contact form inbox: listing, status changes and admin replies.

use super::models::{ContactMessageWithReplies, ContactReplyRequest, ContactStatus};
use super::{ApiClient, ApiError};
use serde_json::Value;

const CONTACT_PATH: &str = "/api/contact";

pub const COLUMNS: &[&str] = &["id", "status", "name", "email", "subject", "created_at"];

pub fn list(
    client: &ApiClient,
    status: Option<ContactStatus>,
    token: Option<&str>,
) -> Result<Vec<Value>, ApiError> {
    let path = match status {
        Some(s) => format!("{}?status={}", CONTACT_PATH, s.as_str()),
        None => CONTACT_PATH.to_string(),
    };
    match client.get(&path, token)? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        _ => Err(ApiError::Decode("expected a list of messages".to_string())),
    }
}

pub fn with_replies(
    client: &ApiClient,
    id: u64,
    token: Option<&str>,
) -> Result<ContactMessageWithReplies, ApiError> {
    client.get_as(&format!("{}/{}/with-replies", CONTACT_PATH, id), token)
}

pub fn set_status(
    client: &ApiClient,
    id: u64,
    status: ContactStatus,
    token: Option<&str>,
) -> Result<(), ApiError> {
    let body = serde_json::json!({ "status": status });
    client.put(&format!("{}/{}/status", CONTACT_PATH, id), &body, token)?;
    Ok(())
}

pub fn reply(
    client: &ApiClient,
    reply: &ContactReplyRequest,
    token: Option<&str>,
) -> Result<(), ApiError> {
    let body = serde_json::to_value(reply).map_err(|e| ApiError::Decode(e.to_string()))?;
    client.post(
        &format!("{}/{}/replies", CONTACT_PATH, reply.contact_message_id),
        Some(&body),
        token,
    )?;
    Ok(())
}

pub fn delete(client: &ApiClient, id: u64, token: Option<&str>) -> Result<(), ApiError> {
    client.delete(&format!("{}/{}", CONTACT_PATH, id), token)?;
    Ok(())
}
