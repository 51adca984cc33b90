use super::ApiError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Keys an envelope object may carry alongside `data`
const ENVELOPE_KEYS: &[&str] = &["data", "message", "success", "total", "page", "limit", "totalPages"];

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    agent: ureq::Agent,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::Agent::new(),
            timeout,
        }
    }

    /// Same client with a different per-request timeout
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str, token: Option<&str>) -> Result<Value, ApiError> {
        self.send("GET", path, None, token)
    }

    pub fn post(&self, path: &str, body: Option<&Value>, token: Option<&str>) -> Result<Value, ApiError> {
        self.send("POST", path, body, token)
    }

    pub fn put(&self, path: &str, body: &Value, token: Option<&str>) -> Result<Value, ApiError> {
        self.send("PUT", path, Some(body), token)
    }

    pub fn delete(&self, path: &str, token: Option<&str>) -> Result<Value, ApiError> {
        self.send("DELETE", path, None, token)
    }

    /// GET and decode into a typed value
    pub fn get_as<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> Result<T, ApiError> {
        let value = self.get(path, token)?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let url = self.url(path);
        tracing::debug!(method, %url, "api request");

        let mut req = self
            .agent
            .request(method, &url)
            .timeout(self.timeout)
            .set("Content-Type", "application/json");
        if let Some(token) = token {
            req = req.set("Authorization", &format!("Bearer {}", token));
        }

        let resp = match body {
            Some(body) => req.send_json(body.clone()),
            None => req.call(),
        };

        match resp {
            Ok(r) => {
                let text = r
                    .into_string()
                    .map_err(|e| ApiError::Decode(e.to_string()))?;
                parse_body(&text)
            }
            Err(ureq::Error::Status(401, _)) => Err(ApiError::Unauthorized),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                tracing::warn!(method, %url, status = code, "api error");
                Err(ApiError::Status { status: code, body })
            }
            Err(e) => Err(ApiError::Transport(e.to_string())),
        }
    }
}

/// Decode a response body, accepting both bare values and `{ "data": ... }` envelopes
pub fn parse_body(text: &str) -> Result<Value, ApiError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))?;
    Ok(unwrap_envelope(value))
}

fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map)
            if map.contains_key("data")
                && map.keys().all(|k| ENVELOPE_KEYS.contains(&k.as_str())) =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}
