//! DataCrunch cloud provider
//!
//! Loads the provider configuration, builds every configured node group
//! against the live API, and reports what it found. Useful for validating a
//! cluster config before handing it to the autoscaler.

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use dcas_cloud_provider::{Config, DatacrunchProvider};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting DataCrunch cloud provider");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        api_url = %config.api_url,
        node_groups = config.node_group_specs.len(),
        node_configs = config.cluster_config.node_configs.len(),
        delete_scripts_after_boot = config.delete_scripts_after_boot,
        "Configuration loaded"
    );

    let provider = DatacrunchProvider::from_config(&config)
        .await
        .context("failed to build provider")?;
    provider.refresh().await.context("failed to refresh node groups")?;

    for group in provider.node_groups() {
        let members = group.nodes().await?;
        info!(
            provider = provider.name(),
            group = %group.id(),
            min = group.min_size(),
            max = group.max_size(),
            target = group.target_size(),
            members = members.len(),
            "Node group"
        );
    }

    let machine_types = provider.available_machine_types().await?;
    let gpu_types = provider.available_gpu_types().await?;
    info!(
        count = machine_types.len(),
        gpu = gpu_types.len(),
        gpu_label = provider.gpu_label(),
        limits = %provider.resource_limiter(),
        "Instance types available"
    );

    let stats = provider.manager().inventory().stats();
    info!(
        hits = stats.hits.load(Ordering::Relaxed),
        misses = stats.misses.load(Ordering::Relaxed),
        "Inventory cache"
    );

    Ok(())
}
