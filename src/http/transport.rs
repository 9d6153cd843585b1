// SPDX-License-Identifier: AGPL-3.0-or-later
//! `reqwest`-backed transport

use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;

use super::{HttpFailure, HttpRequest, RawResponse, Transport, Verb};
use crate::error::{DrError, Result};

/// Production transport for node traffic
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the transport with a per-request timeout
    ///
    /// Certificate verification is turned off. Node traffic stays on the
    /// internal cluster network and the nodes present certificates issued for
    /// their cluster-internal names, so this is a deliberate trust decision
    /// limited to this client. Do not reuse it for any other endpoint.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .map_err(|e| DrError::ExternalService {
                service: "HTTP client".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> std::result::Result<RawResponse, HttpFailure> {
        let method = match request.verb {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Delete => Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.payload.is_null() {
            builder = builder.json(&request.payload);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        Ok(RawResponse { status, body })
    }
}

fn classify(error: reqwest::Error) -> HttpFailure {
    if error.is_timeout() {
        HttpFailure::Timeout(error.to_string())
    } else if error.is_connect() {
        HttpFailure::Connect(error.to_string())
    } else {
        HttpFailure::Transport(error.to_string())
    }
}
