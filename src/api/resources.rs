//! CRUD resources exposed by the API.
//!
//! Every admin screen is the same list/get/create/update/delete cycle over a
//! JSON collection, so resources are described by a static table instead of
//! one module each.

use super::models::MailStats;
use super::{ApiClient, ApiError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

static TIME_OF_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}:\d{2}$").expect("valid time regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Email,
    Integer,
    Bool,
    /// Show slot time; bare `HH:MM` is expanded to today's UTC datetime
    TimeOfDay,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn req(name: &'static str, kind: FieldKind) -> Field {
    Field {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: FieldKind) -> Field {
    Field {
        name,
        kind,
        required: false,
    }
}

#[derive(Debug)]
pub struct ResourceSpec {
    /// Console name, e.g. `mail-queue`
    pub name: &'static str,
    pub path: &'static str,
    /// Columns shown by `list`
    pub columns: &'static [&'static str],
    /// Writable fields; empty for read-only resources
    pub fields: &'static [Field],
}

impl ResourceSpec {
    pub fn writable(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn item_path(&self, id: u64) -> String {
        format!("{}/{}", self.path, id)
    }

    /// Build a request body from `name=value` pairs.
    /// `partial` skips the required-field check (updates).
    pub fn build_body(&self, pairs: &[(String, String)], partial: bool) -> Result<Value, FieldError> {
        if !self.writable() {
            return Err(FieldError::ReadOnly(self.name));
        }

        let mut body = Map::new();
        for (name, raw) in pairs {
            let field = self
                .fields
                .iter()
                .find(|f| f.name == name)
                .ok_or_else(|| FieldError::Unknown {
                    resource: self.name,
                    field: name.clone(),
                    allowed: self.fields.iter().map(|f| f.name).collect::<Vec<_>>().join(", "),
                })?;
            body.insert(name.clone(), coerce(field, raw)?);
        }

        if !partial {
            for field in self.fields.iter().filter(|f| f.required) {
                if !body.contains_key(field.name) {
                    return Err(FieldError::Missing(field.name));
                }
            }
        }
        if body.is_empty() {
            return Err(FieldError::Empty);
        }
        Ok(Value::Object(body))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("{0} is read-only")]
    ReadOnly(&'static str),
    #[error("unknown field '{field}' for {resource} (fields: {allowed})")]
    Unknown {
        resource: &'static str,
        field: String,
        allowed: String,
    },
    #[error("missing required field '{0}'")]
    Missing(&'static str),
    #[error("no fields given")]
    Empty,
    #[error("field '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

fn coerce(field: &Field, raw: &str) -> Result<Value, FieldError> {
    let invalid = |message: &str| FieldError::Invalid {
        field: field.name,
        message: message.to_string(),
    };
    match field.kind {
        FieldKind::Text => Ok(Value::String(raw.to_string())),
        FieldKind::Email => {
            if EMAIL_RE.is_match(raw) {
                Ok(Value::String(raw.to_string()))
            } else {
                Err(invalid("not a valid email address"))
            }
        }
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid("expected an integer")),
        FieldKind::Bool => match raw.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid("expected true or false")),
        },
        FieldKind::TimeOfDay => {
            if TIME_OF_DAY_RE.is_match(raw) {
                let today = chrono::Utc::now().format("%Y-%m-%d");
                Ok(Value::String(format!("{}T{}:00Z", today, raw)))
            } else {
                Ok(Value::String(raw.to_string()))
            }
        }
    }
}

/// Whether `s` looks like an email address
pub fn is_valid_email(s: &str) -> bool {
    EMAIL_RE.is_match(s)
}

use FieldKind::*;

pub static RESOURCES: &[ResourceSpec] = &[
    ResourceSpec {
        name: "news",
        path: "/api/news",
        columns: &["id", "title", "author", "category", "timestamp"],
        fields: &[
            req("title", Text),
            req("story", Text),
            req("author", Text),
            req("category", Text),
            opt("image", Text),
        ],
    },
    ResourceSpec {
        name: "shows",
        path: "/api/shows",
        columns: &["id", "hosts", "time_from", "time_to"],
        fields: &[
            req("hosts", Text),
            req("time_from", TimeOfDay),
            req("time_to", TimeOfDay),
            opt("image", Text),
        ],
    },
    ResourceSpec {
        name: "clients",
        path: "/api/clients",
        columns: &["id", "name", "link"],
        fields: &[req("name", Text), opt("image", Text), opt("link", Text)],
    },
    ResourceSpec {
        name: "videos",
        path: "/api/videos",
        columns: &["id", "title", "video_url", "created_at"],
        fields: &[req("title", Text), req("video_url", Text)],
    },
    ResourceSpec {
        name: "users",
        path: "/api/users",
        columns: &["id", "name", "email", "role", "phone"],
        fields: &[
            req("name", Text),
            req("email", Email),
            req("role", Text),
            req("password", Text),
            opt("phone", Text),
        ],
    },
    ResourceSpec {
        name: "subscribers",
        path: "/api/subscribers",
        columns: &["id", "email", "name", "subscribed"],
        fields: &[req("email", Email), req("subscribed", Bool), opt("name", Text)],
    },
    ResourceSpec {
        name: "subscriptions",
        path: "/api/subscriptions",
        columns: &["id", "user_name", "user_email", "subscribed"],
        fields: &[req("user_id", Integer), req("subscribed", Bool)],
    },
    ResourceSpec {
        name: "mail-queue",
        path: "/api/mail-queue",
        columns: &["id", "subject", "sent", "created_at", "sent_at"],
        fields: &[req("subject", Text), req("body", Text), opt("image", Text)],
    },
    ResourceSpec {
        name: "mail-logs",
        path: "/api/mail-logs",
        columns: &["id", "subscriber_email", "mail_subject", "sent_at"],
        fields: &[],
    },
];

/// Look up a resource by console name
pub fn find(name: &str) -> Option<&'static ResourceSpec> {
    RESOURCES.iter().find(|r| r.name == name)
}

/// A resource bound to a client and the caller's credential
pub struct Resource<'a> {
    client: &'a ApiClient,
    pub spec: &'static ResourceSpec,
    token: Option<&'a str>,
}

impl<'a> Resource<'a> {
    pub fn new(client: &'a ApiClient, spec: &'static ResourceSpec, token: Option<&'a str>) -> Self {
        Self {
            client,
            spec,
            token,
        }
    }

    pub fn list(&self) -> Result<Vec<Value>, ApiError> {
        match self.client.get(self.spec.path, self.token)? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(ApiError::Decode(format!(
                "expected a list from {}, got {}",
                self.spec.path,
                type_name(&other)
            ))),
        }
    }

    pub fn get(&self, id: u64) -> Result<Value, ApiError> {
        self.client.get(&self.spec.item_path(id), self.token)
    }

    pub fn create(&self, body: &Value) -> Result<Value, ApiError> {
        self.client.post(self.spec.path, Some(body), self.token)
    }

    pub fn update(&self, id: u64, body: &Value) -> Result<Value, ApiError> {
        self.client.put(&self.spec.item_path(id), body, self.token)
    }

    pub fn delete(&self, id: u64) -> Result<(), ApiError> {
        self.client.delete(&self.spec.item_path(id), self.token)?;
        Ok(())
    }
}

/// Queue a mail campaign for delivery to all subscribers
pub fn send_mail(client: &ApiClient, id: u64, token: Option<&str>) -> Result<(), ApiError> {
    client.post(&format!("/api/mail-queue/{}/send", id), None, token)?;
    Ok(())
}

pub fn mail_stats(client: &ApiClient, token: Option<&str>) -> Result<MailStats, ApiError> {
    client.get_as("/api/mail-logs/stats", token)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
