//! Gridlink Agent
//!
//! Keeps every attached project supplied with work: contacts each project's
//! scheduler when its backoff window allows, rediscovers scheduler URLs from
//! the master page when they keep failing, and logs what the servers hand
//! back.

use anyhow::{Context, Result};
use gridlink_agent::config::Config;
use gridlink_agent::scheduler::SchedulerPoller;
use gridlink_client::{HttpTransport, Transport};
use gridlink_core::domain::project::Project;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridlink_agent=info,gridlink_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gridlink Agent");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: {} project(s), work buffer {:?}, rpc timeout {:?}",
        config.projects.len(),
        config.work_buffer,
        config.rpc_timeout
    );

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::with_timeout(tokio::runtime::Handle::current(), config.rpc_timeout)
            .context("Failed to build HTTP transport")?,
    );

    // Scheduler URLs are discovered from each master page on first contact
    let projects: Vec<Project> = config
        .projects
        .iter()
        .map(|url| Project::new(url.clone()).with_authenticator(config.authenticator.clone()))
        .collect();

    for project in &projects {
        info!("  - {}", project.master_url());
    }

    let mut poller = SchedulerPoller::new(config, transport, projects);

    if let Err(e) = poller.run().await {
        error!("Poller error: {:#}", e);
        return Err(e);
    }

    info!("Gridlink Agent stopped");
    Ok(())
}
