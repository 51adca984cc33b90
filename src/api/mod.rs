//! Client for the broadcast organization's REST API.

pub mod auth;
pub mod client;
pub mod contact;
pub mod hero;
pub mod models;
pub mod resources;

pub use auth::{session_token, AuthApi};
pub use client::ApiClient;
pub use resources::{Resource, ResourceSpec};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized (HTTP 401)")]
    Unauthorized,
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}
