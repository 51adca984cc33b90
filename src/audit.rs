use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only JSONL record of session and mutation events for one console
pub struct AuditLog {
    pub path: PathBuf,
    tab_id: String,
    file: Mutex<File>,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    tab_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl AuditLog {
    pub fn new(path: &Path, tab_id: &str) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            tab_id: tab_id.to_string(),
            file: Mutex::new(file),
        })
    }

    pub fn log(&self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            tab_id: &self.tab_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    pub fn login(&self, email: &str, user_id: u64) -> Result<()> {
        self.log(
            "login",
            serde_json::json!({ "email": email, "user_id": user_id }),
        )
    }

    pub fn login_failed(&self, email: &str, error: &str) -> Result<()> {
        self.log(
            "login_failed",
            serde_json::json!({ "email": email, "error": error }),
        )
    }

    pub fn logout(&self, email: Option<&str>, reason: &str) -> Result<()> {
        self.log(
            "logout",
            serde_json::json!({ "email": email, "reason": reason }),
        )
    }

    /// Log the session entering its expiry warning window
    pub fn session_warning(&self, remaining_ms: i64) -> Result<()> {
        self.log(
            "session_warning",
            serde_json::json!({ "remaining_ms": remaining_ms }),
        )
    }

    pub fn session_extended(&self, last_activity_ms: i64) -> Result<()> {
        self.log(
            "session_extended",
            serde_json::json!({ "last_activity_ms": last_activity_ms }),
        )
    }

    /// Log a create/update/delete/send request against the API
    pub fn api_mutation(&self, method: &str, path: &str, ok: bool) -> Result<()> {
        self.log(
            "api_mutation",
            serde_json::json!({ "method": method, "path": path, "ok": ok }),
        )
    }
}
