use std::sync::Arc;

use async_trait::async_trait;
use sqm_netlink::tc::{
    filter::{DEFAULT_PRIORITY, U32_KIND, U32RedirectFilterRequest},
    handle::{QdiscRequestInner, display_handle},
    ingress::QdiscIngressRequest,
};
use sqm_netlink::{Link, Netlink, Qdisc};
use tracing::{debug, error, info};

use super::Controller;
use crate::error::{Error, Result};
use crate::state::SharedState;

/// Redirects everything arriving on the physical device to the ifb device.
///
/// Two resources are involved: the ingress qdisc on the physical device, and a u32 filter
/// under it whose mirred action steals each packet and sends it out of the ifb device, where
/// the ingress shaper sees it as egress traffic.
///
/// The filter is only checked by kind. If a u32 filter already sits under the ingress qdisc,
/// nothing is created, even if it points at a different device or priority.
#[derive(Debug)]
pub struct RedirectController {
    priority: u16,
    netlink: Arc<dyn Netlink>,
    state: Arc<SharedState>,
}

impl RedirectController {
    /// Redirect at the default filter priority.
    pub fn new(netlink: Arc<dyn Netlink>, state: Arc<SharedState>) -> Self {
        Self { priority: DEFAULT_PRIORITY, netlink, state }
    }

    /// Set the priority the filter is created with.
    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    async fn find_ingress_qdisc(&self, device: &Link) -> Result<Option<Qdisc>> {
        let qdiscs = self
            .netlink
            .qdiscs(device.tc_index())
            .await
            .map_err(Error::configuration("failed to list qdiscs"))?;

        Ok(qdiscs.into_iter().find(Qdisc::is_ingress))
    }

    async fn ensure_ingress_qdisc(&self, device: &Link) -> Result<Qdisc> {
        if let Some(qdisc) = self.find_ingress_qdisc(device).await? {
            return Ok(qdisc);
        }

        match self.netlink.add_ingress_qdisc(QdiscIngressRequest::new(device.tc_index())).await {
            Ok(()) => info!(device = %device.name, "created ingress qdisc"),
            Err(e) if e.is_already_exists() => {
                debug!(device = %device.name, "ingress qdisc created concurrently")
            }
            Err(source) => {
                return Err(Error::Configuration {
                    context: "failed to create ingress qdisc",
                    source,
                });
            }
        }

        self.find_ingress_qdisc(device).await?.ok_or_else(|| Error::Configuration {
            context: "ingress qdisc missing after creation",
            source: sqm_netlink::Error::UnexpectedResponse(format!(
                "no ingress qdisc listed on {}",
                device.name
            )),
        })
    }

    async fn ensure_filter(&self, device: &Link, target: &Link, ingress: &Qdisc) -> Result<()> {
        let inner = QdiscRequestInner::new(device.tc_index()).with_parent(ingress.handle);
        let filters = self
            .netlink
            .filters(inner)
            .await
            .map_err(Error::configuration("failed to list filters"))?;

        if filters.iter().any(|f| f.kind == U32_KIND) {
            return Ok(());
        }

        let request = U32RedirectFilterRequest::new(device.tc_index(), target.index)
            .with_parent(ingress.handle)
            .with_priority(self.priority);
        self.netlink
            .add_redirect_filter(request)
            .await
            .map_err(Error::configuration("failed to create redirect filter"))?;

        info!(
            device = %device.name,
            target = %target.name,
            parent = display_handle(ingress.handle),
            priority = self.priority,
            "created redirect filter"
        );

        Ok(())
    }
}

#[async_trait]
impl Controller for RedirectController {
    async fn reconcile(&mut self) -> Result<()> {
        let device = self.state.root_device()?;
        let target = self.state.ifb_device()?;

        let ingress = self.ensure_ingress_qdisc(&device).await?;
        self.ensure_filter(&device, &target, &ingress).await
    }

    async fn reconcile_delete(&mut self) {
        let Ok(device) = self.state.root_device() else {
            return;
        };

        let qdisc = match self.find_ingress_qdisc(&device).await {
            Ok(Some(qdisc)) => qdisc,
            Ok(None) => {
                debug!(device = %device.name, "no ingress qdisc to delete");
                return;
            }
            Err(e) => {
                error!(device = %device.name, err = %e, "failed to look up ingress qdisc");
                return;
            }
        };

        // Filters attached to it go with it.
        match self.netlink.delete_qdisc(qdisc.request_inner()).await {
            Ok(()) => info!(device = %device.name, "deleted ingress qdisc"),
            Err(e) if e.is_not_found() => {
                debug!(device = %device.name, "ingress qdisc already gone")
            }
            Err(e) => error!(device = %device.name, err = %e, "failed to delete ingress qdisc"),
        }
    }
}
