// SPDX-License-Identifier: AGPL-3.0-or-later
//! DR operation token ceremony
//!
//! A DR secondary only accepts privileged replication changes with an
//! operation token. The node hands out a one-time pad, collects recovery key
//! shares one request at a time and finally returns the token XORed with the
//! pad.

pub mod codec;
mod runner;

pub use codec::OperationToken;
pub use runner::{CeremonyRunner, CeremonySession};
