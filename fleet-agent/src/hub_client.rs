//! Outbound HTTP to the hub.

use std::time::Duration;

use serde_json::Value;

use crate::error::SyncError;

/// Per-request timeout. A timeout aborts only the step that issued it.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The orchestrator's only way to reach the hub.
pub trait HubClient {
    /// POST `body` as JSON to `path` (e.g. `/agent/heartbeat`) and return the
    /// decoded response body (`null` when empty).
    fn post(&self, path: &str, body: &Value) -> Result<Value, SyncError>;
}

impl<T: HubClient + ?Sized> HubClient for &T {
    fn post(&self, path: &str, body: &Value) -> Result<Value, SyncError> {
        (**self).post(path, body)
    }
}

/// Blocking client with a bearer token.
pub struct HttpHubClient {
    base_url: String,
    token: String,
    agent: ureq::Agent,
}

impl HttpHubClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn get(&self, path: &str) -> Result<Value, SyncError> {
        self.send(self.agent.get(&self.url(path)), None)
    }

    pub fn delete(&self, path: &str) -> Result<Value, SyncError> {
        self.send(self.agent.delete(&self.url(path)), None)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, request: ureq::Request, body: Option<&Value>) -> Result<Value, SyncError> {
        let request = if self.token.is_empty() {
            request
        } else {
            request.set("Authorization", &format!("Bearer {}", self.token))
        };
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        match result {
            Ok(response) => {
                let text = response
                    .into_string()
                    .map_err(|e| SyncError::Transport(e.to_string()))?;
                if text.trim().is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(serde_json::from_str(&text)?)
                }
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(SyncError::Hub {
                    status,
                    body: error_detail(&body),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(SyncError::Transport(transport.to_string()))
            }
        }
    }
}

impl HubClient for HttpHubClient {
    fn post(&self, path: &str, body: &Value) -> Result<Value, SyncError> {
        tracing::debug!("POST {}{path}", self.base_url);
        self.send(self.agent.post(&self.url(path)), Some(body))
    }
}

/// The hub's `{"detail": "..."}` message when present, else the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
