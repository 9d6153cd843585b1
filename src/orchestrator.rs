// SPDX-License-Identifier: AGPL-3.0-or-later
//! Role swap sequencing
//!
//! Promotes the DR secondary, repoints the public CNAME, demotes the old
//! primary and wires it back up as a secondary of the new one. Every step is
//! a precondition for the next. There is no rollback: a failure after
//! promotion leaves a valid but incomplete DR setup that the operator has to
//! finish by hand, so the last completed step is always logged.

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::ceremony::CeremonyRunner;
use crate::config::RoleAssignment;
use crate::dns::DnsUpdater;
use crate::error::{DrError, Result};
use crate::http::ResilientHttpClient;
use crate::node::{cluster_id_fragment, host_of, VaultNode};
use crate::secrets::SecretProvider;

/// Steps of a role swap, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    VerifySecondary,
    CancelStaleAttempt,
    PromotionToken,
    Promote,
    RepointDns,
    AwaitPropagation,
    Demote,
    SecondaryToken,
    ReplicationToken,
    UpdatePrimary,
}

impl Step {
    pub const ALL: [Step; 10] = [
        Step::VerifySecondary,
        Step::CancelStaleAttempt,
        Step::PromotionToken,
        Step::Promote,
        Step::RepointDns,
        Step::AwaitPropagation,
        Step::Demote,
        Step::SecondaryToken,
        Step::ReplicationToken,
        Step::UpdatePrimary,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            Step::VerifySecondary => "check the replication status of the secondary",
            Step::CancelStaleAttempt => "cancel any active DR token generation on the secondary",
            Step::PromotionToken => "generate a DR operation token on the secondary",
            Step::Promote => "promote the secondary to primary",
            Step::RepointDns => "point the public CNAME at the new primary",
            Step::AwaitPropagation => "wait for DNS changes to propagate",
            Step::Demote => "demote the old primary to a secondary",
            Step::SecondaryToken => "generate a secondary activation token on the new primary",
            Step::ReplicationToken => "generate a DR operation token on the new secondary",
            Step::UpdatePrimary => "point the new secondary at the new primary",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Outcome of a completed role swap
#[derive(Debug)]
pub struct SwapReport {
    pub promoted: String,
    pub demoted: String,
    pub steps_completed: Vec<Step>,
    pub total_duration_ms: u64,
}

/// Runs one failover or failback
pub struct RoleSwapOrchestrator<'a> {
    roles: &'a RoleAssignment,
    /// Current secondary, promoted by this run
    target: VaultNode,
    /// Current primary, demoted by this run
    source: VaultNode,
    target_host: String,
    secondary_id_prefix: String,
    dns: &'a dyn DnsUpdater,
    secrets: &'a dyn SecretProvider,
    propagation_delay: Duration,
}

impl<'a> RoleSwapOrchestrator<'a> {
    /// Build the orchestrator; fails before any network call if a node domain
    /// cannot be interpreted
    pub fn new(
        roles: &'a RoleAssignment,
        client: Arc<ResilientHttpClient>,
        vault_token: &str,
        dns: &'a dyn DnsUpdater,
        secrets: &'a dyn SecretProvider,
        propagation_delay: Duration,
    ) -> Result<Self> {
        let target_host = host_of(&roles.target)?;
        let secondary_id_prefix = match &roles.secondary_id_prefix {
            Some(prefix) => prefix.clone(),
            None => cluster_id_fragment(&roles.source)?,
        };

        Ok(Self {
            roles,
            target: VaultNode::new(&roles.target, client.clone(), vault_token),
            source: VaultNode::new(&roles.source, client, vault_token),
            target_host,
            secondary_id_prefix,
            dns,
            secrets,
            propagation_delay,
        })
    }

    /// Execute every step in order
    pub async fn run(&self) -> Result<SwapReport> {
        let start_time = Instant::now();
        let mut completed = Vec::with_capacity(Step::ALL.len());

        info!(
            mode = %self.roles.mode,
            environment = %self.roles.environment,
            promote = %self.roles.target,
            demote = %self.roles.source,
            cname = %self.roles.cname,
            "Starting DR role swap"
        );

        if let Err(e) = self.run_steps(&mut completed).await {
            error!(
                kind = e.kind(),
                error = %e,
                last_completed = completed.last().map(Step::description).unwrap_or("none"),
                "DR role swap aborted; manual follow-up may be required"
            );
            return Err(e);
        }

        let total_duration_ms = start_time.elapsed().as_millis() as u64;
        info!(
            from = %self.roles.source,
            to = %self.roles.target,
            duration_ms = total_duration_ms,
            "Vault Disaster Recovery Operation Successful"
        );

        Ok(SwapReport {
            promoted: self.roles.target.clone(),
            demoted: self.roles.source.clone(),
            steps_completed: completed,
            total_duration_ms,
        })
    }

    async fn run_steps(&self, completed: &mut Vec<Step>) -> Result<()> {
        let target_ceremony = CeremonyRunner::new(&self.target, self.secrets);
        let source_ceremony = CeremonyRunner::new(&self.source, self.secrets);

        self.begin(Step::VerifySecondary, &self.target);
        self.verify_target_ready().await?;
        completed.push(Step::VerifySecondary);

        self.begin(Step::CancelStaleAttempt, &self.target);
        target_ceremony.cancel_stale_attempt().await;
        completed.push(Step::CancelStaleAttempt);

        self.begin(Step::PromotionToken, &self.target);
        let promotion_token = target_ceremony.run().await?;
        completed.push(Step::PromotionToken);

        self.begin(Step::Promote, &self.target);
        self.target.promote(&promotion_token).await?;
        completed.push(Step::Promote);

        info!(
            step = %Step::RepointDns,
            cname = %self.roles.cname,
            target = %self.target_host,
            "Step started"
        );
        self.dns
            .upsert_cname(&self.roles.cname, &self.target_host)
            .await?;
        completed.push(Step::RepointDns);

        info!(
            step = %Step::AwaitPropagation,
            seconds = self.propagation_delay.as_secs(),
            "Step started"
        );
        tokio::time::sleep(self.propagation_delay).await;
        completed.push(Step::AwaitPropagation);

        self.begin(Step::Demote, &self.source);
        self.source.demote().await?;
        completed.push(Step::Demote);

        self.begin(Step::SecondaryToken, &self.target);
        let activation_id = secondary_activation_id(&self.secondary_id_prefix);
        let activation_token = self.target.secondary_token(&activation_id).await?;
        completed.push(Step::SecondaryToken);

        self.begin(Step::ReplicationToken, &self.source);
        source_ceremony.cancel_stale_attempt().await;
        let replication_token = source_ceremony.run().await?;
        completed.push(Step::ReplicationToken);

        self.begin(Step::UpdatePrimary, &self.source);
        self.source
            .update_primary(
                &replication_token,
                &activation_token,
                &self.roles.primary_api_addr(),
            )
            .await?;
        completed.push(Step::UpdatePrimary);

        Ok(())
    }

    async fn verify_target_ready(&self) -> Result<()> {
        let status = self.target.replication_status().await?;
        if !status.is_streaming_secondary() {
            return Err(DrError::Precondition {
                node: self.target.base_url().to_string(),
                mode: status.mode,
                state: status.state,
            });
        }
        info!(
            node = %self.target.base_url(),
            mode = %status.mode,
            state = %status.state,
            "Secondary is streaming"
        );
        Ok(())
    }

    fn begin(&self, step: Step, node: &VaultNode) {
        info!(step = %step, node = %node.base_url(), "Step started");
    }
}

/// Unique id for a secondary activation token
///
/// Vault rejects a secondary id that is already known to the primary, so the
/// cluster fragment gets a random numeric suffix.
pub fn secondary_activation_id(prefix: &str) -> String {
    let suffix: u64 = rand::thread_rng().gen_range(1..=9_999_999_999);
    format!("{prefix}{suffix}")
}

/// Human-readable plan of a role swap, used by `--dry-run`
pub fn describe_plan(roles: &RoleAssignment, propagation_delay: Duration) -> Result<Vec<String>> {
    let target_host = host_of(&roles.target)?;
    let plan = Step::ALL
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let detail = match step {
                Step::VerifySecondary
                | Step::CancelStaleAttempt
                | Step::PromotionToken
                | Step::Promote
                | Step::SecondaryToken => roles.target.clone(),
                Step::RepointDns => format!("{} -> {}", roles.cname, target_host),
                Step::AwaitPropagation => format!("{} seconds", propagation_delay.as_secs()),
                Step::Demote | Step::ReplicationToken => roles.source.clone(),
                Step::UpdatePrimary => {
                    format!("{} (primary_api_addr {})", roles.source, roles.primary_api_addr())
                }
            };
            format!("{:>2}. {}: {}", index + 1, step, detail)
        })
        .collect();
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ceremony::codec;
    use crate::config::{DrMode, Environment};
    use crate::http::scripted::ScriptedTransport;
    use crate::http::{HttpFailure, RetryPolicy, Verb};
    use crate::secrets::ScriptedShares;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    const STATUS: &str = "/v1/sys/replication/dr/status";
    const ATTEMPT: &str = "/v1/sys/replication/dr/secondary/generate-operation-token/attempt";
    const UPDATE: &str = "/v1/sys/replication/dr/secondary/generate-operation-token/update";
    const PROMOTE: &str = "/v1/sys/replication/dr/secondary/promote";
    const DEMOTE: &str = "/v1/sys/replication/dr/primary/demote";
    const SECONDARY_TOKEN: &str = "/v1/sys/replication/dr/primary/secondary-token";
    const UPDATE_PRIMARY: &str = "/v1/sys/replication/dr/secondary/update-primary";

    const EAST: &str = "https://vault-east-a1b2c3d4.example.com";
    const WEST: &str = "https://vault-west-e5f6a7b8.example.com";

    #[derive(Default)]
    struct RecordingDns {
        changes: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl DnsUpdater for RecordingDns {
        async fn upsert_cname(&self, alias: &str, target: &str) -> Result<()> {
            self.changes
                .lock()
                .unwrap()
                .push((alias.to_string(), target.to_string()));
            if self.fail {
                return Err(DrError::ExternalService {
                    service: "Route 53 CNAME update".to_string(),
                    message: "AccessDenied".to_string(),
                });
            }
            Ok(())
        }
    }

    fn failover_roles() -> RoleAssignment {
        RoleAssignment {
            mode: DrMode::Failover,
            environment: Environment::Prod,
            target: WEST.to_string(),
            source: EAST.to_string(),
            cname: "vault.example.com".to_string(),
            secondary_id_prefix: None,
        }
    }

    fn client(transport: &Arc<ScriptedTransport>, max_retries: u32) -> Arc<ResilientHttpClient> {
        Arc::new(ResilientHttpClient::new(
            transport.clone(),
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_secs(30),
            },
        ))
    }

    fn script_promotion(transport: &ScriptedTransport) {
        transport
            .push_json(json!({"data": {"mode": "secondary", "state": "stream-wals"}}))
            .push_raw(204, "")
            .push_json(json!({"started": true, "nonce": "n1", "otp": "AB", "required": 1, "complete": false}))
            .push_json(json!({"progress": 1, "required": 1, "complete": true, "encoded_token": "AAA="}))
            .push_raw(200, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_failover() {
        let transport = Arc::new(ScriptedTransport::new());
        script_promotion(&transport);
        let replication_encoded = codec::encode(b"XY", "CD").unwrap();
        transport
            .push_raw(204, "")
            .push_json(json!({"wrap_info": {"token": "wrapped-activation", "ttl": 300}}))
            .push_raw(404, "{\"errors\":[]}")
            .push_json(json!({"nonce": "n2", "otp": "CD", "complete": false}))
            .push_json(json!({"progress": 1, "complete": true, "encoded_token": replication_encoded}))
            .push_raw(204, "");

        let roles = failover_roles();
        let dns = RecordingDns::default();
        let shares = ScriptedShares::new(&["recovery-1"]);
        let orchestrator = RoleSwapOrchestrator::new(
            &roles,
            client(&transport, 10),
            "s.root",
            &dns,
            &shares,
            Duration::from_secs(60),
        )
        .unwrap();

        let started = tokio::time::Instant::now();
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.steps_completed, Step::ALL.to_vec());
        assert_eq!(report.promoted, WEST);
        assert_eq!(report.demoted, EAST);
        assert!(started.elapsed() >= Duration::from_secs(60));

        let calls: Vec<(Verb, String)> = transport
            .requests()
            .iter()
            .map(|r| (r.verb, r.url.clone()))
            .collect();
        let expected = vec![
            (Verb::Get, format!("{WEST}{STATUS}")),
            (Verb::Delete, format!("{WEST}{ATTEMPT}")),
            (Verb::Post, format!("{WEST}{ATTEMPT}")),
            (Verb::Post, format!("{WEST}{UPDATE}")),
            (Verb::Post, format!("{WEST}{PROMOTE}")),
            (Verb::Post, format!("{EAST}{DEMOTE}")),
            (Verb::Post, format!("{WEST}{SECONDARY_TOKEN}")),
            (Verb::Delete, format!("{EAST}{ATTEMPT}")),
            (Verb::Post, format!("{EAST}{ATTEMPT}")),
            (Verb::Post, format!("{EAST}{UPDATE}")),
            (Verb::Post, format!("{EAST}{UPDATE_PRIMARY}")),
        ];
        assert_eq!(calls, expected);

        let requests = transport.requests();
        assert_eq!(requests[4].payload, json!({"dr_operation_token": "AB"}));
        assert_eq!(
            requests[10].payload,
            json!({
                "dr_operation_token": "XY",
                "token": "wrapped-activation",
                "primary_api_addr": "https://vault.example.com"
            })
        );

        let id = requests[6].payload["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("a1b2c3d4"));
        assert!(id["a1b2c3d4".len()..].chars().all(|c| c.is_ascii_digit()));

        assert_eq!(
            *dns.changes.lock().unwrap(),
            vec![(
                "vault.example.com".to_string(),
                "vault-west-e5f6a7b8.example.com".to_string()
            )]
        );
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn test_primary_target_short_circuits() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"data": {"mode": "primary", "state": "running"}}));

        let roles = failover_roles();
        let dns = RecordingDns::default();
        let shares = ScriptedShares::new(&["recovery-1"]);
        let orchestrator = RoleSwapOrchestrator::new(
            &roles,
            client(&transport, 10),
            "s.root",
            &dns,
            &shares,
            Duration::from_secs(60),
        )
        .unwrap();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, DrError::Precondition { ref mode, .. } if mode == "primary"));
        assert_eq!(transport.calls(), vec![(Verb::Get, STATUS.to_string())]);
        assert!(dns.changes.lock().unwrap().is_empty());
        assert!(shares.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dns_failure_stops_before_demotion() {
        let transport = Arc::new(ScriptedTransport::new());
        script_promotion(&transport);

        let roles = failover_roles();
        let dns = RecordingDns {
            fail: true,
            ..RecordingDns::default()
        };
        let shares = ScriptedShares::new(&["recovery-1"]);
        let orchestrator = RoleSwapOrchestrator::new(
            &roles,
            client(&transport, 10),
            "s.root",
            &dns,
            &shares,
            Duration::from_secs(60),
        )
        .unwrap();

        let err = orchestrator.run().await.unwrap_err();
        assert_eq!(err.kind(), "external-service");
        assert!(!transport.calls().iter().any(|(_, path)| path == DEMOTE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_demote_failure_after_promotion() {
        let transport = Arc::new(ScriptedTransport::new());
        script_promotion(&transport);
        transport
            .push_failure(HttpFailure::Connect("refused".to_string()))
            .push_failure(HttpFailure::Connect("refused".to_string()));

        let roles = failover_roles();
        let dns = RecordingDns::default();
        let shares = ScriptedShares::new(&["recovery-1"]);
        let orchestrator = RoleSwapOrchestrator::new(
            &roles,
            client(&transport, 1),
            "s.root",
            &dns,
            &shares,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, DrError::RetriesExhausted { ref url, .. } if url.ends_with(DEMOTE)));
        assert_eq!(dns.changes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failback_demotes_configured_secondary() {
        let roles = RoleAssignment {
            mode: DrMode::Failback,
            target: EAST.to_string(),
            source: WEST.to_string(),
            ..failover_roles()
        };
        let transport = Arc::new(ScriptedTransport::new());
        let dns = RecordingDns::default();
        let shares = ScriptedShares::new(&[]);
        let orchestrator = RoleSwapOrchestrator::new(
            &roles,
            client(&transport, 0),
            "s.root",
            &dns,
            &shares,
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(orchestrator.target_host, "vault-east-a1b2c3d4.example.com");
        assert_eq!(orchestrator.secondary_id_prefix, "e5f6a7b8");
    }

    #[test]
    fn test_configured_prefix_overrides_domain() {
        let roles = RoleAssignment {
            source: "https://vault.internal".to_string(),
            secondary_id_prefix: Some("east".to_string()),
            ..failover_roles()
        };
        let transport = Arc::new(ScriptedTransport::new());
        let dns = RecordingDns::default();
        let shares = ScriptedShares::new(&[]);
        let orchestrator = RoleSwapOrchestrator::new(
            &roles,
            client(&transport, 0),
            "s.root",
            &dns,
            &shares,
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(orchestrator.secondary_id_prefix, "east");
    }

    #[test]
    fn test_bad_domain_fails_before_network() {
        let roles = RoleAssignment {
            target: "vault-west.example.com".to_string(),
            ..failover_roles()
        };
        let transport = Arc::new(ScriptedTransport::new());
        let dns = RecordingDns::default();
        let shares = ScriptedShares::new(&[]);
        let result = RoleSwapOrchestrator::new(
            &roles,
            client(&transport, 0),
            "s.root",
            &dns,
            &shares,
            Duration::ZERO,
        );

        assert!(matches!(result, Err(DrError::InvalidConfig { .. })));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_secondary_activation_id() {
        let id = secondary_activation_id("a1b2c3d4");
        let suffix: u64 = id["a1b2c3d4".len()..].parse().unwrap();
        assert!((1..=9_999_999_999).contains(&suffix));
    }

    #[test]
    fn test_describe_plan() {
        let plan = describe_plan(&failover_roles(), Duration::from_secs(60)).unwrap();
        assert_eq!(plan.len(), Step::ALL.len());
        assert!(plan[0].starts_with(" 1. check the replication status"));
        assert!(plan[4].ends_with("vault.example.com -> vault-west-e5f6a7b8.example.com"));
        assert!(plan[5].contains("60 seconds"));
        assert!(plan[9].contains("primary_api_addr https://vault.example.com"));
    }

    #[test]
    fn test_describe_plan_rejects_unparseable_target() {
        let mut roles = failover_roles();
        roles.target = "vault-west-e5f6a7b8.example.com".to_string();
        let err = describe_plan(&roles, Duration::from_secs(60)).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
