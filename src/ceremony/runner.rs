// SPDX-License-Identifier: AGPL-3.0-or-later
//! Attempt / update / complete state machine

use std::fmt;
use tracing::{info, warn};

use super::codec::{self, OperationToken};
use crate::error::Result;
use crate::node::{missing, TokenGeneration, VaultNode, TOKEN_ATTEMPT_PATH, TOKEN_UPDATE_PATH};
use crate::secrets::SecretProvider;

/// Server-side token generation progress, as seen by this run
#[derive(Clone, PartialEq, Eq)]
pub struct CeremonySession {
    pub nonce: String,
    otp: String,
    pub otp_length: usize,
    pub progress: u32,
    pub required: u32,
    pub complete: bool,
    encoded_token: Option<String>,
}

impl CeremonySession {
    /// Session from the attempt response; nonce and otp are only sent here
    fn open(attempt: TokenGeneration, url: &str) -> Result<Self> {
        let nonce = attempt.nonce.ok_or_else(|| missing("nonce", url))?;
        let otp = attempt.otp.ok_or_else(|| missing("otp", url))?;
        let complete = attempt.complete.ok_or_else(|| missing("complete", url))?;

        Ok(Self {
            nonce,
            otp,
            otp_length: attempt.otp_length,
            progress: attempt.progress,
            required: attempt.required,
            complete,
            encoded_token: non_empty(attempt.encoded_token),
        })
    }

    fn apply(&mut self, update: TokenGeneration, url: &str) -> Result<()> {
        self.complete = update.complete.ok_or_else(|| missing("complete", url))?;
        self.progress = update.progress;
        self.required = update.required;
        if let Some(encoded) = non_empty(update.encoded_token) {
            self.encoded_token = Some(encoded);
        }
        Ok(())
    }

    /// Decode the token; consumes the session
    fn into_token(self, url: &str) -> Result<OperationToken> {
        let encoded = self
            .encoded_token
            .ok_or_else(|| missing("encoded_token", url))?;
        Ok(codec::decode(&encoded, &self.otp)?)
    }
}

impl fmt::Debug for CeremonySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CeremonySession")
            .field("nonce", &self.nonce)
            .field("otp", &"<redacted>")
            .field("otp_length", &self.otp_length)
            .field("progress", &self.progress)
            .field("required", &self.required)
            .field("complete", &self.complete)
            .field("encoded_token", &self.encoded_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Drives one token ceremony against a node
pub struct CeremonyRunner<'a> {
    node: &'a VaultNode,
    secrets: &'a dyn SecretProvider,
}

impl<'a> CeremonyRunner<'a> {
    pub fn new(node: &'a VaultNode, secrets: &'a dyn SecretProvider) -> Self {
        Self { node, secrets }
    }

    /// Cancel a leftover attempt so the next one starts from a clean state
    ///
    /// Failures are logged and ignored; a 404 just means nothing was in flight.
    pub async fn cancel_stale_attempt(&self) {
        match self.node.cancel_token_attempt().await {
            Ok(()) => info!(node = %self.node.base_url(), "Cancelled any in-flight token attempt"),
            Err(failure) => warn!(
                node = %self.node.base_url(),
                error = %failure,
                details = failure.details(),
                "No token attempt cancelled"
            ),
        }
    }

    /// Start an attempt, submit shares until the node reports completion and
    /// decode the resulting operation token
    pub async fn run(&self) -> Result<OperationToken> {
        let node = self.node.base_url();

        info!(node = %node, "Starting DR operation token generation");
        let attempt_url = self.node.url(TOKEN_ATTEMPT_PATH);
        let attempt = self.node.start_token_attempt().await?;
        let mut session = CeremonySession::open(attempt, &attempt_url)?;

        if session.otp_length != 0 && session.otp_length != session.otp.len() {
            warn!(
                otp_length = session.otp_length,
                actual = session.otp.len(),
                "Node reported an OTP length that differs from the OTP"
            );
        }

        info!(
            node = %node,
            required = session.required,
            "Submitting recovery keys"
        );

        let update_url = self.node.url(TOKEN_UPDATE_PATH);
        let mut index = 1usize;
        // `required` is informational only; the node decides when it is done
        while !session.complete {
            let key = self.secrets.recovery_key(index).await?;
            let update = self.node.submit_recovery_key(&key, &session.nonce).await?;
            session.apply(update, &update_url)?;

            info!(
                node = %node,
                progress = session.progress,
                required = session.required,
                complete = session.complete,
                "Recovery key accepted"
            );
            index += 1;
        }

        let token = session.into_token(&update_url)?;
        info!(node = %node, "DR operation token reconstructed");
        Ok(token)
    }
}
