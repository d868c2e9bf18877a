use std::sync::Arc;

use async_trait::async_trait;
use sqm_netlink::Netlink;
use sqm_netlink::tc::{
    cake::{CAKE_KIND, CakeOptions, DEFAULT_OVERHEAD, QdiscCakeRequest},
    handle::{EGRESS_SHAPER_MAJOR, INGRESS_SHAPER_MAJOR, QdiscRequestInner, make_handle},
};
use tracing::{debug, info};

use super::Controller;
use crate::error::{Dependency, Error, Result};
use crate::state::{Direction, SharedState};

/// Keeps a CAKE qdisc at the root of the shaped device, sized to the current line rate.
///
/// Ingress traffic is shaped on the ifb device, egress traffic on the physical device.
#[derive(Debug)]
pub struct ShaperController {
    direction: Direction,
    overhead: i32,
    netlink: Arc<dyn Netlink>,
    state: Arc<SharedState>,
    /// Last request the kernel accepted.
    applied: Option<QdiscCakeRequest>,
}

impl ShaperController {
    /// Shape `direction` with the default overhead.
    pub fn new(direction: Direction, netlink: Arc<dyn Netlink>, state: Arc<SharedState>) -> Self {
        Self { direction, overhead: DEFAULT_OVERHEAD, netlink, state, applied: None }
    }

    /// Set the per-packet overhead passed to CAKE.
    pub fn with_overhead(mut self, overhead: i32) -> Self {
        self.overhead = overhead;
        self
    }

    fn major(&self) -> u16 {
        match self.direction {
            Direction::Ingress => INGRESS_SHAPER_MAJOR,
            Direction::Egress => EGRESS_SHAPER_MAJOR,
        }
    }

    fn rate_dependency(&self) -> Dependency {
        match self.direction {
            Direction::Ingress => Dependency::IngressRate,
            Direction::Egress => Dependency::EgressRate,
        }
    }

    /// Whether `request` is still what the kernel has at our handle.
    async fn in_place(&self, request: &QdiscCakeRequest) -> Result<bool> {
        if self.applied.as_ref() != Some(request) {
            return Ok(false);
        }

        let qdiscs = self
            .netlink
            .qdiscs(request.inner.interface_index)
            .await
            .map_err(Error::configuration("failed to list qdiscs"))?;

        Ok(qdiscs.iter().any(|q| q.handle == request.inner.handle && q.kind == CAKE_KIND))
    }
}

#[async_trait]
impl Controller for ShaperController {
    async fn reconcile(&mut self) -> Result<()> {
        let device = self.state.shaped_device(self.direction)?;

        let rate = self.state.rate(self.direction);
        if rate <= 0 {
            return Err(Error::NotReady(self.rate_dependency()));
        }

        let options = u64::try_from(rate)
            .ok()
            .and_then(CakeOptions::from_kbps)
            .ok_or(Error::RateOutOfRange { direction: self.direction, rate })?;
        let request = QdiscCakeRequest::new(
            QdiscRequestInner::new(device.tc_index()).with_handle(make_handle(self.major(), 0)),
            options.with_overhead(self.overhead),
        );

        if self.in_place(&request).await? {
            debug!(direction = ?self.direction, device = %device.name, rate, "shaper unchanged");
            return Ok(());
        }

        self.netlink
            .replace_cake(request)
            .await
            .map_err(Error::configuration("failed to replace cake qdisc"))?;
        self.applied = Some(request);

        info!(
            direction = ?self.direction,
            device = %device.name,
            rate,
            base_rate = request.options.base_rate,
            "shaper configured"
        );

        Ok(())
    }

    /// Nothing to undo. The ifb device takes its qdisc with it and the physical device keeps
    /// its shaper.
    async fn reconcile_delete(&mut self) {}
}
