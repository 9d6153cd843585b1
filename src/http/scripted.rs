// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted transport for unit tests

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{HttpFailure, HttpRequest, RawResponse, Transport, Verb};

/// Replays queued responses in order and records every request it sees
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse, HttpFailure>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_json(&self, body: Value) -> &Self {
        self.push_raw(200, &body.to_string())
    }

    pub(crate) fn push_raw(&self, status: u16, body: &str) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(RawResponse {
            status,
            body: body.to_string(),
        }));
        self
    }

    pub(crate) fn push_failure(&self, failure: HttpFailure) -> &Self {
        self.responses.lock().unwrap().push_back(Err(failure));
        self
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `(verb, path)` of each request, with the base URL stripped
    pub(crate) fn calls(&self) -> Vec<(Verb, String)> {
        self.requests()
            .into_iter()
            .map(|r| {
                let path = r
                    .url
                    .find("/v1/")
                    .map(|at| r.url[at..].to_string())
                    .unwrap_or(r.url);
                (r.verb, path)
            })
            .collect()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse, HttpFailure> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(HttpFailure::Transport("script exhausted".to_string())))
    }
}
