// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP access to the cluster nodes
//!
//! [`ResilientHttpClient`] owns the retry policy. The wire itself sits behind
//! the [`Transport`] trait so the ceremony can be driven against scripted
//! responses.

mod client;
mod transport;

#[cfg(test)]
pub(crate) mod scripted;

pub use client::{ResilientHttpClient, RetryPolicy};
pub use transport::ReqwestTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// HTTP verbs used against the nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
        })
    }
}

/// A single request as handed to a [`Transport`]
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub verb: Verb,
    pub url: String,
    /// JSON body; `Value::Null` sends no body
    pub payload: Value,
    pub headers: Vec<(String, String)>,
}

/// Status and body of a response, before any interpretation
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Body of a successful call
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    /// 2xx with a body that is not JSON, usually empty
    Raw(String),
}

impl ResponseBody {
    pub fn json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Raw(_) => None,
        }
    }
}

/// Failure classes that are retried with backoff
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// Node answered with status >= 400
    #[error("HTTP status {status}")]
    Status { status: u16, body: String },

    /// Connection could not be established
    #[error("connection error: {0}")]
    Connect(String),

    /// Request timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Any other transport-level error
    #[error("request error: {0}")]
    Transport(String),
}

impl HttpFailure {
    /// Response body for operator diagnosis, if the node sent one
    pub fn details(&self) -> &str {
        match self {
            HttpFailure::Status { body, .. } => body,
            _ => "",
        }
    }
}

/// Sends one request over the wire without retrying
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, HttpFailure>;
}
