// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retrying HTTP client
//!
//! Every status >= 400, connection failure, timeout or other transport error
//! is retried with exponential backoff. A 2xx whose body is not JSON is a
//! success and is handed back as [`ResponseBody::Raw`].

use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{HttpFailure, HttpRequest, ResponseBody, Transport, Verb};
use crate::config::HttpConfig;
use crate::error::{DrError, Result};

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(config.base_backoff_secs),
        }
    }

    /// Delay before retry `retry` (1-indexed) without jitter: `base * 2^(retry-1)`
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Base delay plus 1..=999 ms of jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(1..=999);
        self.base_delay_for(retry) + Duration::from_millis(jitter)
    }
}

/// Executes one logical call, retrying transient failures
pub struct ResilientHttpClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl ResilientHttpClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a call, retrying per the policy
    ///
    /// Returns [`DrError::RetriesExhausted`] once `max_retries + 1` attempts
    /// have failed; callers treat that as the end of the run.
    pub async fn execute(
        &self,
        verb: Verb,
        url: &str,
        payload: Value,
        headers: &[(String, String)],
    ) -> Result<ResponseBody> {
        let request = HttpRequest {
            verb,
            url: url.to_string(),
            payload,
            headers: headers.to_vec(),
        };

        let mut retries = 0u32;
        loop {
            info!(verb = %verb, url = %url, attempt = retries + 1, "Sending request");

            let failure = match self.attempt(&request).await {
                Ok(body) => return Ok(body),
                Err(failure) => failure,
            };

            error!(
                verb = %verb,
                url = %url,
                error = %failure,
                details = failure.details(),
                "Request failed"
            );

            if retries >= self.policy.max_retries {
                error!(
                    max_retries = self.policy.max_retries,
                    "Exceeded maximum retries, aborting"
                );
                return Err(DrError::RetriesExhausted {
                    verb: verb.to_string(),
                    url: url.to_string(),
                    retries: self.policy.max_retries,
                    last_failure: describe(&failure),
                });
            }

            retries += 1;
            let delay = self.policy.delay_for(retries);
            warn!(
                retry = retries,
                backoff_secs = %format!("{:.3}", delay.as_secs_f64()),
                "Retrying after exponential backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Execute a call exactly once, handing any failure back to the caller
    pub async fn execute_once(
        &self,
        verb: Verb,
        url: &str,
        payload: Value,
        headers: &[(String, String)],
    ) -> std::result::Result<ResponseBody, HttpFailure> {
        let request = HttpRequest {
            verb,
            url: url.to_string(),
            payload,
            headers: headers.to_vec(),
        };
        self.attempt(&request).await
    }

    async fn attempt(&self, request: &HttpRequest) -> std::result::Result<ResponseBody, HttpFailure> {
        let response = self.transport.send(request).await?;

        if response.status >= 400 {
            return Err(HttpFailure::Status {
                status: response.status,
                body: response.body,
            });
        }

        match serde_json::from_str::<Value>(&response.body) {
            Ok(value) => Ok(ResponseBody::Json(value)),
            Err(_) => {
                info!(
                    url = %request.url,
                    status = response.status,
                    "Response body is not JSON"
                );
                Ok(ResponseBody::Raw(response.body))
            }
        }
    }
}

fn describe(failure: &HttpFailure) -> String {
    match failure.details() {
        "" => failure.to_string(),
        details => format!("{failure}: {details}"),
    }
}
