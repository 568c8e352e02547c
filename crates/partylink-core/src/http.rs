//! HTTP transport abstraction over the party REST control plane
//!
//! The [`HttpClient`] trait is the seam between the service wrappers
//! and the network: production uses [`ReqwestClient`], tests record
//! requests and script responses. Error bodies carry a machine-readable
//! `errorCode` which is mapped onto typed [`PartyError`] variants here
//! so callers never match on strings.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PartyError, PartyResult};

/// HTTP method subset used by the party service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        write!(f, "{}", name)
    }
}

/// Raw response from the control plane
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body, already parsed as JSON (Null for empty bodies)
    pub body: Value,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport seam for REST calls
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue one request with a bearer credential and optional JSON body
    async fn send(
        &self,
        method: Method,
        url: &str,
        bearer: &str,
        body: Option<Value>,
    ) -> PartyResult<HttpResponse>;
}

/// Production transport backed by reqwest
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    /// Build a client with default settings
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(
        &self,
        method: Method,
        url: &str,
        bearer: &str,
        body: Option<Value>,
    ) -> PartyResult<HttpResponse> {
        let req_method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        debug!(%method, url, "sending request");

        let mut request = self
            .inner
            .request(req_method, url)
            .header("Authorization", bearer);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PartyError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| PartyError::Transport(e.to_string()))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(HttpResponse { status, body })
    }
}

/// Check a response for success, converting error bodies into typed
/// errors
pub fn check_response(response: HttpResponse) -> PartyResult<Value> {
    if response.is_success() {
        return Ok(response.body);
    }
    Err(error_from_body(response.status, &response.body))
}

fn error_from_body(status: u16, body: &Value) -> PartyError {
    let code = body
        .get("errorCode")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let message = body
        .get("errorMessage")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    warn!(status, code, "service rejected request");

    // Codes the client reacts to structurally get their own variants;
    // everything else stays a generic service error.
    match code.as_str() {
        c if c.ends_with("auth.invalid_token") || status == 401 => {
            PartyError::Unauthorized(message)
        }
        c if c.ends_with("party.not_leader") => PartyError::NotLeader,
        c if c.ends_with("party.already_in_party")
            || c.ends_with("user_has_party") =>
        {
            PartyError::AlreadyInParty
        }
        c if c.ends_with("party.party_is_full") => PartyError::PartyFull,
        c if c.ends_with("party.stale_revision") => {
            let mut vars = body
                .get("messageVars")
                .and_then(Value::as_array)
                .map(|v| {
                    v.iter()
                        .filter_map(Value::as_str)
                        .filter_map(|s| s.parse::<u64>().ok())
                })
                .into_iter()
                .flatten();
            PartyError::StaleRevision {
                sent: vars.next().unwrap_or(0),
                current: vars.next().unwrap_or(0),
            }
        }
        _ => PartyError::Service {
            code,
            message,
            status,
        },
    }
}
