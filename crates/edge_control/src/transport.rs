//! HTTP plumbing behind a trait so the event loop can be driven by an
//! in-process fake.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;

pub const APP_AUTH_TOKEN_HEADER: &str = "X-SS-App-Auth-Token";
pub const COMPONENT_ID_HEADER: &str = "X-SS-App-Component-Id";
pub const REQUESTED_BY_HEADER: &str = "X-Requested-By";
pub const USER_AUTH_TOKEN_HEADER: &str = "X-SS-User-Auth-Token";

pub type Headers = Vec<(&'static str, String)>;

/// Headers every control-plane request carries.
pub fn app_headers(auth_token: &str, component_id: &str) -> Headers {
    vec![
        (APP_AUTH_TOKEN_HEADER, auth_token.to_string()),
        (COMPONENT_ID_HEADER, component_id.to_string()),
        (REQUESTED_BY_HEADER, "true".to_string()),
    ]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Header names lower-cased.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Response {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POSTs `body` as JSON to `path` relative to the control-plane base URL.
    async fn post(&self, path: &str, headers: &Headers, body: &JsonValue) -> Result<Response>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, path: &str, headers: &Headers, body: &JsonValue) -> Result<Response> {
        let url = self.url(path);
        let mut request = self.client.post(&url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", url))?;
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
