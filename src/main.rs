//! amq-shadow CLI
//!
//! Bootstraps the management client, probes the broker's AMQP listeners,
//! and runs either live interception (one session per authorized vhost)
//! or the read-only fallback collector.

use amq_shadow::config::Cli;
use amq_shadow::{fallback, AmqpConnector, HttpManagementClient, ManagementApi, Supervisor};
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client = HttpManagementClient::new(&cli.url, &cli.username, &cli.password)?;
    let management_host = client.host();
    let management: Arc<dyn ManagementApi> = Arc::new(client);

    let overview = management.overview().await?;
    info!(
        product = %overview.product_name,
        version = %overview.product_version,
        cluster = %overview.cluster_name,
        "Connected to management API"
    );
    let identity = management.whoami().await?;
    info!(user = %identity.name, "Authenticated");

    let listeners = management.list_amqp_listeners().await?;
    match fallback::probe_listeners(&listeners, management_host.as_deref()).await {
        Some((host, port)) => run_live(management, &cli, host, port).await,
        None => run_fallback(management).await,
    }
}

async fn run_live(
    management: Arc<dyn ManagementApi>,
    cli: &Cli,
    host: String,
    port: u16,
) -> Result<()> {
    let connector = Arc::new(AmqpConnector {
        host,
        port,
        username: cli.username.clone(),
        password: cli.password.clone(),
    });
    let supervisor = Supervisor::new(management, connector, cli.username.clone());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, requesting session shutdown");
            on_interrupt.cancel();
        }
    });

    let reports = supervisor.run(cancel).await?;
    let processed = reports.iter().filter(|r| r.state.is_success()).count();
    info!(
        processed,
        total = reports.len(),
        "Interception finished"
    );

    if processed == 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_fallback(management: Arc<dyn ManagementApi>) -> Result<()> {
    warn!("No AMQP listener reachable; polling queued backlog over the management API");

    let backlogs = fallback::collect(&management).await?;
    let messages: usize = backlogs.iter().map(|b| b.messages).sum();
    info!(
        queues = backlogs.len(),
        messages,
        "Backlog snapshot complete; traffic consumed before this run is not visible"
    );

    if backlogs.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
