// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credentials and recovery keys
//!
//! Each secret is read from an environment variable first and falls back to a
//! hidden terminal prompt, which is repeated until the operator enters a
//! non-empty value. This module is the only place that reads process
//! environment on behalf of the core.
//!
//! Recovery key prompts run on the blocking pool so an interrupt raced
//! against the ceremony is still observed while the operator is typing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{DrError, Result};

/// Source of recovery key shares for the token ceremony
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Recovery key share `index`, starting at 1
    async fn recovery_key(&self, index: usize) -> Result<String>;
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;
type Prompt = Arc<dyn Fn(&str) -> std::io::Result<String> + Send + Sync>;

/// Environment variable lookup with a secure prompt fallback
pub struct EnvOrPrompt {
    lookup: Lookup,
    prompt: Prompt,
    /// Keys entered at the prompt, reused by the second ceremony of the run
    prompted: Mutex<HashMap<usize, String>>,
}

impl Default for EnvOrPrompt {
    fn default() -> Self {
        Self::new(
            |name| std::env::var(name).ok(),
            |message| rpassword::prompt_password(message),
        )
    }
}

impl EnvOrPrompt {
    pub fn new<L, P>(lookup: L, prompt: P) -> Self
    where
        L: Fn(&str) -> Option<String> + Send + Sync + 'static,
        P: Fn(&str) -> std::io::Result<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
            prompt: Arc::new(prompt),
            prompted: Mutex::new(HashMap::new()),
        }
    }

    /// Value of `var`, or prompt with `label` until something is entered
    pub fn secret(&self, var: &str, label: &str) -> Result<String> {
        if let Some(value) = (self.lookup)(var) {
            debug!(variable = %var, "Secret supplied by environment");
            return Ok(value);
        }

        prompt_until_entered(self.prompt.as_ref(), var, label)
    }

    fn prompted(&self, var: &str) -> Result<MutexGuard<'_, HashMap<usize, String>>> {
        self.prompted.lock().map_err(|_| DrError::Secret {
            name: var.to_string(),
            message: "recovery key cache poisoned".to_string(),
        })
    }

    /// Collect the Vault token and AWS credentials
    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            vault_token: self.secret("VAULT_TOKEN", "Vault Token")?,
            aws_access_key_id: self.secret("AWS_ACCESS_KEY_ID", "AWS ACCESS KEY ID")?,
            aws_secret_access_key: self.secret("AWS_SECRET_KEY", "AWS SECRET KEY")?,
        })
    }
}

fn prompt_until_entered(
    prompt: &(dyn Fn(&str) -> std::io::Result<String> + Send + Sync),
    var: &str,
    label: &str,
) -> Result<String> {
    loop {
        let value = prompt(&format!("Enter {label}:")).map_err(|e| DrError::Secret {
            name: var.to_string(),
            message: e.to_string(),
        })?;
        if !value.is_empty() {
            return Ok(value);
        }
    }
}

#[async_trait]
impl SecretProvider for EnvOrPrompt {
    async fn recovery_key(&self, index: usize) -> Result<String> {
        let var = format!("VAULT_RECOVERY_KEY_{index}");
        if let Some(value) = (self.lookup)(&var) {
            return Ok(value);
        }

        let cached = self.prompted(&var)?.get(&index).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }

        let value = tokio::task::spawn_blocking({
            let prompt = Arc::clone(&self.prompt);
            let var = var.clone();
            move || prompt_until_entered(prompt.as_ref(), &var, &format!("Vault Recovery Key {index}"))
        })
        .await
        .map_err(|e| DrError::Secret {
            name: var.clone(),
            message: format!("prompt task failed: {e}"),
        })??;

        self.prompted(&var)?.insert(index, value.clone());
        Ok(value)
    }
}

/// Credentials assembled once at startup
#[derive(Clone)]
pub struct Credentials {
    pub vault_token: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("vault_token", &"<redacted>")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Fixed list of shares, for tests
#[cfg(test)]
pub(crate) struct ScriptedShares {
    pub(crate) shares: Vec<String>,
    pub(crate) requested: Mutex<Vec<usize>>,
}

#[cfg(test)]
impl ScriptedShares {
    pub(crate) fn new(shares: &[&str]) -> Self {
        Self {
            shares: shares.iter().map(|s| s.to_string()).collect(),
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SecretProvider for ScriptedShares {
    async fn recovery_key(&self, index: usize) -> Result<String> {
        self.requested.lock().unwrap().push(index);
        self.shares
            .get(index - 1)
            .cloned()
            .ok_or_else(|| DrError::Secret {
                name: format!("VAULT_RECOVERY_KEY_{index}"),
                message: "no more scripted shares".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_environment_wins_over_prompt() {
        let provider = EnvOrPrompt::new(
            |name| (name == "VAULT_RECOVERY_KEY_2").then(|| "env-key-2".to_string()),
            |_| panic!("should not prompt"),
        );
        assert_eq!(provider.recovery_key(2).await.unwrap(), "env-key-2");
    }

    #[test]
    fn test_prompt_repeats_until_non_empty() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let provider = EnvOrPrompt::new(
            |_| None,
            move |message| {
                assert_eq!(message, "Enter Vault Token:");
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(if n < 2 { String::new() } else { "s.token".to_string() })
            },
        );

        assert_eq!(provider.secret("VAULT_TOKEN", "Vault Token").unwrap(), "s.token");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_prompted_recovery_keys_are_reused() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let provider = EnvOrPrompt::new(
            |_| None,
            move |message| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(message.replace("Enter Vault Recovery Key ", "key-").replace(':', ""))
            },
        );

        assert_eq!(provider.recovery_key(1).await.unwrap(), "key-1");
        assert_eq!(provider.recovery_key(2).await.unwrap(), "key-2");
        assert_eq!(provider.recovery_key(1).await.unwrap(), "key-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prompt_failure_is_a_secret_error() {
        let provider = EnvOrPrompt::new(
            |_| None,
            |_| Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no tty")),
        );
        let err = provider.recovery_key(1).await.unwrap_err();
        assert!(matches!(err, DrError::Secret { ref name, .. } if name == "VAULT_RECOVERY_KEY_1"));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let provider = EnvOrPrompt::new(|name| Some(format!("value-of-{name}")), |_| unreachable!());
        let credentials = provider.credentials().unwrap();
        assert_eq!(credentials.vault_token, "value-of-VAULT_TOKEN");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("value-of-VAULT_TOKEN"));
        assert!(!debug.contains("value-of-AWS_SECRET_KEY"));
    }
}
