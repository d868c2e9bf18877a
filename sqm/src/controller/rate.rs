use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::Controller;
use crate::error::Result;
use crate::rates::RateSource;
use crate::state::SharedState;

/// Publishes the modem's line rates into the shared state.
#[derive(Debug)]
pub struct RatePoller {
    source: Box<dyn RateSource>,
    state: Arc<SharedState>,
}

impl RatePoller {
    /// Poll `source`, publishing into `state`.
    pub fn new(source: Box<dyn RateSource>, state: Arc<SharedState>) -> Self {
        Self { source, state }
    }
}

#[async_trait]
impl Controller for RatePoller {
    async fn reconcile(&mut self) -> Result<()> {
        let rates = self.source.query().await?;

        let ingress_changed = self.state.set_ingress_rate(rates.ingress);
        let egress_changed = self.state.set_egress_rate(rates.egress);
        if ingress_changed || egress_changed {
            info!(ingress = rates.ingress, egress = rates.egress, "line rates changed");
        } else {
            debug!(ingress = rates.ingress, egress = rates.egress, "line rates unchanged");
        }

        Ok(())
    }

    async fn reconcile_delete(&mut self) {}
}
