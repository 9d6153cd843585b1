// SPDX-License-Identifier: AGPL-3.0-or-later
//! DR replication endpoints of a single cluster node

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::ceremony::OperationToken;
use crate::error::{DrError, ProtocolError, Result};
use crate::http::{HttpFailure, ResilientHttpClient, ResponseBody, Verb};

const STATUS_PATH: &str = "/v1/sys/replication/dr/status";
pub(crate) const TOKEN_ATTEMPT_PATH: &str = "/v1/sys/replication/dr/secondary/generate-operation-token/attempt";
pub(crate) const TOKEN_UPDATE_PATH: &str = "/v1/sys/replication/dr/secondary/generate-operation-token/update";
const PROMOTE_PATH: &str = "/v1/sys/replication/dr/secondary/promote";
const DEMOTE_PATH: &str = "/v1/sys/replication/dr/primary/demote";
const SECONDARY_TOKEN_PATH: &str = "/v1/sys/replication/dr/primary/secondary-token";
const UPDATE_PRIMARY_PATH: &str = "/v1/sys/replication/dr/secondary/update-primary";

/// Replication mode and state as reported under `data` by the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReplicationStatus {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub state: String,
}

impl ReplicationStatus {
    /// Only a streaming DR secondary can be promoted
    pub fn is_streaming_secondary(&self) -> bool {
        self.mode == "secondary" && self.state == "stream-wals"
    }
}

#[derive(Deserialize)]
struct StatusEnvelope {
    data: Option<ReplicationStatus>,
}

/// Body of the generate-operation-token attempt and update endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenGeneration {
    #[serde(default)]
    pub started: bool,
    pub nonce: Option<String>,
    pub otp: Option<String>,
    #[serde(default)]
    pub otp_length: usize,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub required: u32,
    pub complete: Option<bool>,
    pub encoded_token: Option<String>,
}

#[derive(Deserialize)]
struct SecondaryTokenEnvelope {
    wrap_info: Option<WrapInfo>,
}

#[derive(Deserialize)]
struct WrapInfo {
    token: Option<String>,
}

/// A Vault cluster node reached through the shared HTTP client
pub struct VaultNode {
    base_url: String,
    client: Arc<ResilientHttpClient>,
    headers: Vec<(String, String)>,
}

impl VaultNode {
    pub fn new(base_url: &str, client: Arc<ResilientHttpClient>, vault_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            headers: vec![("X-Vault-Token".to_string(), vault_token.to_string())],
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Host name of the node, used as the CNAME target
    pub fn host(&self) -> Result<String> {
        host_of(&self.base_url)
    }

    pub async fn replication_status(&self) -> Result<ReplicationStatus> {
        let url = self.url(STATUS_PATH);
        let body = self.call(Verb::Get, &url, Value::Null).await?;
        let envelope: StatusEnvelope = parse(body, &url)?;
        envelope.data.ok_or_else(|| missing("data", &url))
    }

    /// Cancel an in-flight token attempt with a single request
    ///
    /// Nothing is retried; a 404 or other failure just means there was no
    /// attempt to cancel, so the caller decides whether to care.
    pub async fn cancel_token_attempt(&self) -> std::result::Result<(), HttpFailure> {
        let url = self.url(TOKEN_ATTEMPT_PATH);
        self.client
            .execute_once(Verb::Delete, &url, Value::Null, &self.headers)
            .await
            .map(|_| ())
    }

    pub async fn start_token_attempt(&self) -> Result<TokenGeneration> {
        let url = self.url(TOKEN_ATTEMPT_PATH);
        let body = self.call(Verb::Post, &url, json!({})).await?;
        parse(body, &url)
    }

    pub async fn submit_recovery_key(&self, key: &str, nonce: &str) -> Result<TokenGeneration> {
        let url = self.url(TOKEN_UPDATE_PATH);
        let body = self
            .call(Verb::Post, &url, json!({ "key": key, "nonce": nonce }))
            .await?;
        parse(body, &url)
    }

    pub async fn promote(&self, token: &OperationToken) -> Result<()> {
        let url = self.url(PROMOTE_PATH);
        self.call(Verb::Post, &url, json!({ "dr_operation_token": token.as_str() }))
            .await
            .map(|_| ())
    }

    pub async fn demote(&self) -> Result<()> {
        let url = self.url(DEMOTE_PATH);
        self.call(Verb::Post, &url, json!({})).await.map(|_| ())
    }

    /// Generate a wrapped secondary activation token on a primary
    pub async fn secondary_token(&self, id: &str) -> Result<String> {
        let url = self.url(SECONDARY_TOKEN_PATH);
        let body = self.call(Verb::Post, &url, json!({ "id": id })).await?;
        let envelope: SecondaryTokenEnvelope = parse(body, &url)?;
        envelope
            .wrap_info
            .and_then(|info| info.token)
            .ok_or_else(|| missing("wrap_info.token", &url))
    }

    /// Point this secondary at a new primary
    pub async fn update_primary(
        &self,
        token: &OperationToken,
        secondary_token: &str,
        primary_api_addr: &str,
    ) -> Result<()> {
        let url = self.url(UPDATE_PRIMARY_PATH);
        let payload = json!({
            "dr_operation_token": token.as_str(),
            "token": secondary_token,
            "primary_api_addr": primary_api_addr,
        });
        self.call(Verb::Post, &url, payload).await.map(|_| ())
    }

    async fn call(&self, verb: Verb, url: &str, payload: Value) -> Result<ResponseBody> {
        debug!(verb = %verb, url = %url, "Calling node");
        self.client.execute(verb, url, payload, &self.headers).await
    }
}

/// Host part of a node base URL
pub fn host_of(base_url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(base_url).map_err(|e| DrError::InvalidConfig {
        message: format!("'{base_url}' is not a valid URL: {e}"),
    })?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| DrError::InvalidConfig {
            message: format!("'{base_url}' has no host"),
        })
}

/// Cluster identifier embedded in a node's domain
///
/// Node domains follow `<name>-<cluster id>.<zone>`, e.g.
/// `https://vault-east-a1b2c3d4.example.com` yields `a1b2c3d4`.
pub fn cluster_id_fragment(base_url: &str) -> Result<String> {
    let host = host_of(base_url)?;
    let label = host.split('.').next().unwrap_or_default();
    let fragment = label.rsplit('-').next().unwrap_or_default();

    if fragment.is_empty() || !fragment.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DrError::InvalidConfig {
            message: format!(
                "cannot derive a cluster id from '{base_url}'; set secondary_id_prefix for this environment"
            ),
        });
    }

    Ok(fragment.to_string())
}

fn parse<T: DeserializeOwned>(body: ResponseBody, url: &str) -> Result<T> {
    let value = match body {
        ResponseBody::Json(value) => value,
        ResponseBody::Raw(raw) => {
            return Err(ProtocolError::MalformedResponse {
                url: url.to_string(),
                message: format!("expected a JSON body, got {raw:?}"),
            }
            .into())
        }
    };

    serde_json::from_value(value).map_err(|e| {
        ProtocolError::MalformedResponse {
            url: url.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

pub(crate) fn missing(field: &str, url: &str) -> DrError {
    ProtocolError::MissingField {
        field: field.to_string(),
        url: url.to_string(),
    }
    .into()
}
