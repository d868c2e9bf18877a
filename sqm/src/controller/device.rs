use std::sync::Arc;

use async_trait::async_trait;
use sqm_netlink::{Link, LinkSpec, Netlink};
use tracing::{debug, error, info, warn};

use super::Controller;
use crate::error::{Error, Result};
use crate::state::SharedState;

/// Name prefix of the ifb device created for a physical interface.
pub const IFB_PREFIX: &str = "ifb4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Expected to exist. Published as the root device, never created or deleted.
    Root,
    /// Created on demand with the root device's MTU, deleted at shutdown.
    Ifb,
}

/// Keeps a network interface present and published in the shared state.
#[derive(Debug)]
pub struct DeviceController {
    name: String,
    role: Role,
    netlink: Arc<dyn Netlink>,
    state: Arc<SharedState>,
}

impl DeviceController {
    /// Tracks the physical interface `name`.
    pub fn root(
        name: impl Into<String>,
        netlink: Arc<dyn Netlink>,
        state: Arc<SharedState>,
    ) -> Self {
        Self { name: name.into(), role: Role::Root, netlink, state }
    }

    /// Creates and tracks the ifb device for the physical interface `physical`.
    pub fn ifb(physical: &str, netlink: Arc<dyn Netlink>, state: Arc<SharedState>) -> Self {
        Self { name: ifb_name(physical), role: Role::Ifb, netlink, state }
    }

    /// Name of the managed interface.
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self) -> Result<Link> {
        let root = self.state.root_device()?;
        let spec = LinkSpec::ifb(self.name.clone(), root.mtu);

        self.netlink
            .add_link(&spec)
            .await
            .map_err(Error::configuration("failed to create ifb device"))?;
        info!(name = %self.name, mtu = spec.mtu, "created ifb device");

        self.netlink
            .link_by_name(&self.name)
            .await
            .map_err(|source| Error::Lookup { name: self.name.clone(), source })
    }

    async fn publish(&self, link: Link) -> Result<()> {
        if self.role == Role::Ifb && !link.oper_state.is_up_or_unknown() {
            warn!(name = %self.name, state = %link.oper_state, "ifb device not up, setting up");
            self.netlink
                .set_link_up(link.index)
                .await
                .map_err(Error::configuration("failed to set ifb device up"))?;
        }

        let (index, mtu) = (link.index, link.mtu);
        let changed = match self.role {
            Role::Root => self.state.set_root_device(link),
            Role::Ifb => self.state.set_ifb_device(link),
        };
        if changed {
            info!(name = %self.name, index, mtu, "device changed");
        }

        Ok(())
    }
}

/// The ifb device name for a physical interface, e.g. `ifb4ppp0`.
pub fn ifb_name(physical: &str) -> String {
    format!("{IFB_PREFIX}{physical}")
}

#[async_trait]
impl Controller for DeviceController {
    async fn reconcile(&mut self) -> Result<()> {
        let link = match self.netlink.link_by_name(&self.name).await {
            Ok(link) => link,
            Err(e) if e.is_not_found() && self.role == Role::Ifb => self.create().await?,
            Err(source) => return Err(Error::Lookup { name: self.name.clone(), source }),
        };

        self.publish(link).await
    }

    async fn reconcile_delete(&mut self) {
        if self.role == Role::Root {
            return;
        }

        let Ok(link) = self.state.ifb_device() else {
            debug!(name = %self.name, "no ifb device published, nothing to delete");
            return;
        };

        match self.netlink.delete_link(link.index).await {
            Ok(()) => info!(name = %self.name, index = link.index, "deleted ifb device"),
            Err(e) if e.is_not_found() => {
                debug!(name = %self.name, index = link.index, "ifb device already gone")
            }
            Err(e) => error!(name = %self.name, err = %e, "failed to delete ifb device"),
        }
    }
}
