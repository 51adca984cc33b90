//! Session activity monitor.
//!
//! An authenticated session expires after a fixed period without user
//! activity. Activity is recorded (throttled) into shared storage so every
//! console on the machine sees the same clock; a background timer compares
//! that clock to the timeout, raises a warning near the end and forces a
//! logout when it runs out.

pub mod monitor;
pub mod scheduler;
pub mod tracker;
pub mod warning;

pub use monitor::{Check, LogoutReason, SessionMonitor, SharedMonitor};
pub use scheduler::Scheduler;
pub use tracker::ActivityEvent;
pub use warning::{format_remaining, WarningBanner};

use crate::api::ApiError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Timing rules for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Inactivity allowed before forced logout
    pub timeout: Duration,
    /// Lead time before expiry during which the warning is shown
    pub warning: Duration,
    /// How often the expiry check runs while no warning is shown
    pub poll_interval: Duration,
    /// Minimum spacing between activity timestamp refreshes
    pub activity_throttle: Duration,
    /// Countdown refresh rate while the warning is shown
    pub countdown_tick: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            warning: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(30),
            activity_throttle: Duration::from_secs(5),
            countdown_tick: Duration::from_secs(1),
        }
    }
}

impl SessionPolicy {
    /// Classify a session given the time since its last activity.
    ///
    /// The warning starts strictly after `timeout - warning` has elapsed; at
    /// exactly that point the session is still active.
    pub fn evaluate(&self, elapsed_ms: i64) -> SessionState {
        let remaining = self.remaining_ms(elapsed_ms);
        if remaining <= 0 {
            SessionState::Expired
        } else if remaining < self.warning.as_millis() as i64 {
            SessionState::Warning
        } else {
            SessionState::Active
        }
    }

    /// Milliseconds left before expiry, negative once expired
    pub fn remaining_ms(&self, elapsed_ms: i64) -> i64 {
        self.timeout.as_millis() as i64 - elapsed_ms.max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Warning,
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Warning => "warning",
            Self::Expired => "expired",
        }
    }
}

/// Profile persisted under `auth_user`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not logged in")]
    NoSession,
    #[error("login failed: {0}")]
    Auth(#[source] ApiError),
    #[error("session storage unavailable: {0}")]
    PersistenceUnavailable(#[from] StoreError),
    #[error("stored session is malformed: {0}")]
    MalformedStoredState(String),
    #[error("session ended ({})", .0.as_str())]
    Ended(LogoutReason),
}
