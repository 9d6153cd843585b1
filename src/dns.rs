// SPDX-License-Identifier: AGPL-3.0-or-later
//! Public CNAME updates
//!
//! The role swap only needs one DNS operation: UPSERT the public alias so it
//! points at the newly promoted node. It is called once and not retried.

use async_trait::async_trait;
use aws_sdk_route53::config::{BehaviorVersion, Credentials as AwsCredentials, Region};
use aws_sdk_route53::error::DisplayErrorContext;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use tracing::info;

use crate::config::DnsConfig;
use crate::error::{DrError, Result};
use crate::secrets::Credentials;

/// Repoints the public alias
#[async_trait]
pub trait DnsUpdater: Send + Sync {
    /// Create or replace `alias` as a CNAME of `target`
    async fn upsert_cname(&self, alias: &str, target: &str) -> Result<()>;
}

/// Route 53 hosted zone
pub struct Route53Updater {
    client: aws_sdk_route53::Client,
    hosted_zone_id: String,
    ttl: i64,
}

impl Route53Updater {
    pub fn new(config: &DnsConfig, credentials: &Credentials) -> Self {
        let aws_credentials = AwsCredentials::new(
            credentials.aws_access_key_id.clone(),
            credentials.aws_secret_access_key.clone(),
            None,
            None,
            "vault-dr",
        );

        let sdk_config = aws_sdk_route53::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(aws_credentials)
            .build();

        Self {
            client: aws_sdk_route53::Client::from_conf(sdk_config),
            hosted_zone_id: config.hosted_zone_id.clone(),
            ttl: config.ttl,
        }
    }
}

#[async_trait]
impl DnsUpdater for Route53Updater {
    async fn upsert_cname(&self, alias: &str, target: &str) -> Result<()> {
        let batch = cname_change_batch(alias, target, self.ttl)?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(&self.hosted_zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| route53_error(DisplayErrorContext(&e).to_string()))?;

        info!(
            zone = %self.hosted_zone_id,
            alias = %alias,
            target = %target,
            ttl = self.ttl,
            "CNAME upserted"
        );
        Ok(())
    }
}

/// Single-change UPSERT batch for `alias -> target`
pub fn cname_change_batch(alias: &str, target: &str, ttl: i64) -> Result<ChangeBatch> {
    let record = ResourceRecord::builder()
        .value(target)
        .build()
        .map_err(|e| route53_error(e.to_string()))?;

    let record_set = ResourceRecordSet::builder()
        .name(alias)
        .r#type(RrType::Cname)
        .ttl(ttl)
        .resource_records(record)
        .build()
        .map_err(|e| route53_error(e.to_string()))?;

    let change = Change::builder()
        .action(ChangeAction::Upsert)
        .resource_record_set(record_set)
        .build()
        .map_err(|e| route53_error(e.to_string()))?;

    ChangeBatch::builder()
        .comment(format!("update {alias} -> {target}"))
        .changes(change)
        .build()
        .map_err(|e| route53_error(e.to_string()))
}

fn route53_error(message: String) -> DrError {
    DrError::ExternalService {
        service: "Route 53 CNAME update".to_string(),
        message,
    }
}
