//! One-shot calls made before the event loop starts: component
//! registration and the optional credential exchange.

use crate::config::ControlPlaneCredentials;
use crate::transport::{app_headers, Headers, Transport, REQUESTED_BY_HEADER, USER_AUTH_TOKEN_HEADER};
use anyhow::{bail, Context, Result};
use edge_protocol::defaults::{COMPONENT_TOKEN_PATH, LOGIN_PATH, REGISTRATION_PATH};
use edge_protocol::BuildInfo;
use serde_json::{json, Value as JsonValue};
use tracing::info;

/// Component type requested when exchanging credentials.
pub const COMPONENT_TYPE: &str = "dc-edge";

/// What the agent announces about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInfo {
    pub agent_id: String,
    pub component_id: String,
    pub http_url: String,
    pub build: BuildInfo,
    pub labels: Vec<String>,
}

impl AgentInfo {
    pub fn os() -> &'static str {
        std::env::consts::OS
    }

    pub fn arch() -> &'static str {
        std::env::consts::ARCH
    }
}

/// Registers the component. Anything but HTTP 200 is an error.
pub async fn register(transport: &dyn Transport, auth_token: &str, agent: &AgentInfo) -> Result<()> {
    let body = json!({
        "authToken": auth_token,
        "componentId": agent.component_id,
        "attributes": {
            "baseHttpUrl": agent.http_url,
            "sdcVersion": agent.build.version,
            "sdcBuildDate": agent.build.built_date,
            "sdcBuiltBy": agent.build.built_by,
            "sdcRepoSha": agent.build.built_repo_sha,
            "os": AgentInfo::os(),
            "arch": AgentInfo::arch(),
            "edge": true,
        },
    });
    let headers = app_headers(auth_token, &agent.component_id);
    let response = transport
        .post(REGISTRATION_PATH, &headers, &body)
        .await
        .context("Registration request failed")?;
    if !response.is_ok() {
        bail!(
            "registration rejected with HTTP {}: {}",
            response.status,
            response.body
        );
    }
    info!(component = %agent.component_id, "Registered with control plane");
    Ok(())
}

/// Logs in with user credentials and trades the session for a component
/// auth token.
pub async fn exchange_credentials(
    transport: &dyn Transport,
    credentials: &ControlPlaneCredentials,
    component_id: &str,
) -> Result<String> {
    let login_headers: Headers = vec![(REQUESTED_BY_HEADER, "true".to_string())];
    let login = transport
        .post(
            LOGIN_PATH,
            &login_headers,
            &json!({"userName": credentials.user, "password": credentials.password}),
        )
        .await
        .context("Login request failed")?;
    if !login.is_ok() {
        bail!("login rejected with HTTP {}", login.status);
    }
    let user_token = login
        .header(USER_AUTH_TOKEN_HEADER)
        .context("login response carries no user auth token")?
        .to_string();

    let token_headers: Headers = vec![
        (USER_AUTH_TOKEN_HEADER, user_token),
        (REQUESTED_BY_HEADER, "true".to_string()),
    ];
    let response = transport
        .post(
            COMPONENT_TOKEN_PATH,
            &token_headers,
            &json!({"componentType": COMPONENT_TYPE, "componentId": component_id}),
        )
        .await
        .context("Component token request failed")?;
    if !response.is_ok() {
        bail!("component token rejected with HTTP {}", response.status);
    }
    let body: JsonValue =
        serde_json::from_str(&response.body).context("Invalid component token response")?;
    let token = component_token(&body).context("component token response carries no token")?;
    info!(component = %component_id, "Obtained component auth token");
    Ok(token)
}

/// `fullAuthToken` of an object, or of the first element of a list.
fn component_token(body: &JsonValue) -> Option<String> {
    let entry = match body {
        JsonValue::Array(items) => items.first()?,
        other => other,
    };
    entry
        .get("fullAuthToken")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}
