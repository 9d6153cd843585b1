// SPDX-License-Identifier: AGPL-3.0-or-later
//! vault-dr: disaster-recovery role swap for Vault DR replication clusters
//!
//! A run promotes the DR secondary of one environment, points the public
//! CNAME at it, demotes the old primary and re-attaches it as the new
//! secondary.
//!
//! # Features
//!
//! * **Token ceremony:** Reconstructs DR operation tokens from recovery key shares
//! * **Resilient HTTP:** Retries transient failures with exponential backoff
//! * **DNS repoint:** Upserts the public CNAME in Route 53

pub mod ceremony;
pub mod config;
pub mod dns;
pub mod error;
pub mod http;
pub mod node;
pub mod orchestrator;
pub mod secrets;

pub use config::{Config, DrMode, Environment, RoleAssignment};
pub use error::{DrError, ProtocolError, Result};
pub use orchestrator::RoleSwapOrchestrator;
