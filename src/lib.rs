//! Books catalogue service.
//!
//! Wires the warehouse connector into the module registry and serves the
//! registry over HTTP.

use std::sync::Arc;

use anyhow::Context;
use shelf_db::{Connector, SnowflakeConnector};
use shelf_kernel::{settings::Settings, InitCtx, ModuleRegistry};

pub mod modules;

/// Build a registry holding every module, all sharing `connector`.
pub fn build_registry(connector: Arc<dyn Connector>) -> anyhow::Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    modules::register_all(&mut registry, connector)?;
    Ok(registry)
}

/// Run the service until a shutdown signal arrives.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let connector = SnowflakeConnector::new(&settings.warehouse)
        .context("failed to build warehouse client")?;
    let registry = build_registry(Arc::new(connector))?;

    let ctx = InitCtx {
        settings: &settings,
    };
    registry.init_all(&ctx).await?;
    registry.start_all(&ctx).await?;

    let served = shelf_http::start_server(&registry, &settings).await;

    registry.stop_all().await?;
    served
}
