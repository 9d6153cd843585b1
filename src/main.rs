// SPDX-License-Identifier: AGPL-3.0-or-later
//! vault-dr: fail a Vault DR cluster pair over or back
//!
//! `vault-dr {failover|failback} {prod|staging|test}`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vault_dr::{
    dns::Route53Updater,
    http::{ReqwestTransport, ResilientHttpClient, RetryPolicy},
    orchestrator::describe_plan,
    secrets::EnvOrPrompt,
    Config, DrError, DrMode, Environment, RoleAssignment, RoleSwapOrchestrator,
};

/// Vault disaster recovery: promote the DR secondary and demote the primary
///
/// Credentials come from VAULT_TOKEN, AWS_ACCESS_KEY_ID and AWS_SECRET_KEY,
/// recovery keys from VAULT_RECOVERY_KEY_<n>; anything missing is prompted for.
#[derive(Parser, Debug)]
#[command(name = "vault-dr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "vault-dr.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Print the planned steps without contacting any node
    #[arg(long)]
    dry_run: bool,

    /// Direction of the role swap
    #[arg(value_enum)]
    mode: DrMode,

    /// Environment whose clusters are swapped
    #[arg(value_enum)]
    environment: Environment,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config);

    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        config
            .as_ref()
            .map(|c| c.logging.level.as_str())
            .unwrap_or("info")
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.debug)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!("Failed to create runtime: {}", error);
            return ExitCode::FAILURE;
        }
    };

    let result = match config {
        Ok(config) => runtime.block_on(run(cli, config)),
        Err(e) => Err(e).with_context(|| "Failed to load configuration"),
    };

    // An interrupted recovery key prompt is still blocked on the terminal
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("Error: {:#}", error);
            eprintln!("Error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let config = config.with_env_overrides(|name| std::env::var(name).ok())?;
    let roles = RoleAssignment::resolve(cli.mode, cli.environment, &config.clusters)?;

    if cli.dry_run {
        print_plan(&roles, &config)?;
        return Ok(());
    }

    let secrets = EnvOrPrompt::default();
    let credentials = secrets.credentials().context("Failed to read credentials")?;

    let transport = ReqwestTransport::new(Duration::from_secs(config.http.timeout_secs))?;
    let client = Arc::new(ResilientHttpClient::new(
        Arc::new(transport),
        RetryPolicy::from_config(&config.http),
    ));
    let dns = Route53Updater::new(&config.dns, &credentials);

    let orchestrator = RoleSwapOrchestrator::new(
        &roles,
        client,
        &credentials.vault_token,
        &dns,
        &secrets,
        config.propagation_delay(),
    )?;

    let report = tokio::select! {
        result = orchestrator.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; the last step logged above did not complete");
            return Err(DrError::Interrupted.into());
        }
    };

    info!(steps = report.steps_completed.len(), "All steps completed");
    println!(
        "Vault Disaster Recovery Operation Successful. Failed over from {} to {}",
        report.demoted, report.promoted
    );
    println!("  Duration: {} ms", report.total_duration_ms);
    Ok(())
}

fn print_plan(roles: &RoleAssignment, config: &Config) -> vault_dr::Result<()> {
    let policy = RetryPolicy::from_config(&config.http);
    let plan = describe_plan(roles, config.propagation_delay())?;

    println!(
        "[DRY RUN] Would {} {}: promote {}, demote {}",
        roles.mode, roles.environment, roles.target, roles.source
    );
    println!();
    for line in plan {
        println!("  {}", line);
    }
    println!();
    println!(
        "  HTTP retries: {} (backoff from {} seconds)",
        policy.max_retries,
        policy.base_delay.as_secs()
    );
    Ok(())
}
