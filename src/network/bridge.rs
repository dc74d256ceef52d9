//! Host bridge management

use tracing::{info, warn};

use crate::error::AppError;
use crate::ipam::AddressPool;
use crate::network::link::{require_link, LinkInfo, LinkOps};

/// Ensures the host bridge exists and carries the pool gateway
#[derive(Debug, Clone)]
pub struct BridgeManager {
    name: String,
}

impl BridgeManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the bridge if it is missing.
    ///
    /// An existing device is returned untouched, including one that appears
    /// between the lookup and the create. A failure part way through creation
    /// leaves whatever was already created in place.
    pub async fn ensure<L: LinkOps>(
        &self,
        links: &L,
        pool: &dyn AddressPool,
    ) -> Result<LinkInfo, AppError> {
        if let Some(bridge) = links.find(&self.name).await? {
            info!(bridge = %self.name, index = bridge.index, "bridge already present, nothing to do");
            return Ok(bridge);
        }
        warn!(bridge = %self.name, "bridge does not exist, creating it");

        if let Err(e) = links.add_bridge(&self.name).await {
            // a concurrent ADD may have created it since the lookup
            return match links.find(&self.name).await? {
                Some(bridge) => {
                    info!(bridge = %self.name, index = bridge.index, "bridge created concurrently, using it");
                    Ok(bridge)
                }
                None => Err(e.into()),
            };
        }
        let bridge = require_link(links, &self.name).await?;

        let gateway = pool.gateway()?;
        links.add_address(bridge.index, gateway).await?;
        links.set_up(bridge.index).await?;

        info!(bridge = %self.name, gateway = %gateway, "bridge created");
        Ok(bridge)
    }
}
