pub mod books;

use std::sync::Arc;

use shelf_db::Connector;
use shelf_kernel::ModuleRegistry;

/// Register all project-specific modules with the registry
pub fn register_all(
    registry: &mut ModuleRegistry,
    connector: Arc<dyn Connector>,
) -> anyhow::Result<()> {
    registry.register(books::create_module(connector))?;
    Ok(())
}
