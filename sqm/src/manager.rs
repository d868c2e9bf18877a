//! The reconciliation manager.
//!
//! Each registered controller gets one immediate reconcile at startup, in registration order,
//! then its own task ticking at the registered interval. Failures are logged against the
//! controller's name and retried on the next tick; nothing else happens to a failing
//! controller.
//!
//! On shutdown every task stops ticking, runs its controller's teardown once and exits. The
//! manager waits for all of them. There is no timeout: a hung teardown holds up exit. A
//! shutdown requested before or during the startup pass skips the startup reconciles that
//! haven't begun yet; teardown still runs for every controller.
//!
//! ```text
//!  Created ──► Scheduled ◄──► Reconciling
//!                 │
//!             cancelled
//!                 ▼
//!           Tearing down ──► Stopped
//! ```

use std::{fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt as _;
use tokio::{
    signal::unix::{SignalKind, signal},
    task::JoinSet,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::state::SharedState;

struct Registration {
    name: String,
    interval: Duration,
    controller: Box<dyn Controller>,
}

/// Owns the shared state and drives every registered controller.
pub struct Manager {
    state: Arc<SharedState>,
    registrations: Vec<Registration>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("controllers", &self.controller_names().collect::<Vec<_>>())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    /// A manager with empty state and no controllers.
    pub fn new() -> Self {
        Self {
            state: Arc::new(SharedState::new()),
            registrations: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// The state controllers should be constructed with.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Cancelling this token shuts the manager down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register a controller to be reconciled every `interval`.
    ///
    /// # Panics
    ///
    /// [`run`](Manager::run) panics if `interval` is zero.
    pub fn add_controller<C: Controller>(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        controller: C,
    ) {
        self.registrations.push(Registration {
            name: name.into(),
            interval,
            controller: Box::new(controller),
        });
    }

    /// Names of the registered controllers, in registration order.
    pub fn controller_names(&self) -> impl Iterator<Item = &str> {
        self.registrations.iter().map(|r| r.name.as_str())
    }

    /// Run every controller until the shutdown token is cancelled, then tear them all down.
    ///
    /// Returns once every teardown has completed.
    pub async fn run(self) {
        info!(controllers = self.registrations.len(), "starting controllers");

        let mut workers = JoinSet::new();
        for Registration { name, interval, mut controller } in self.registrations {
            if self.shutdown.is_cancelled() {
                debug!(controller = %name, "shutdown requested, skipping startup reconcile");
            } else {
                reconcile_once(&name, controller.as_mut()).await;
            }
            workers.spawn(drive(name, interval, controller, self.shutdown.clone()));
        }

        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!(err = %e, "controller task failed");
            }
        }

        info!("all controllers stopped");
    }

    /// Like [`run`](Manager::run), shutting down on SIGINT or SIGTERM.
    pub async fn run_until_signal(self) -> Result<()> {
        let mut interrupt = signal(SignalKind::interrupt())
            .map_err(Error::startup("failed to install SIGINT handler"))?;
        let mut terminate = signal(SignalKind::terminate())
            .map_err(Error::startup("failed to install SIGTERM handler"))?;

        let token = self.shutdown_token();
        tokio::spawn(async move {
            let received = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
                _ = token.cancelled() => return,
            };
            info!(signal = received, "received signal, shutting down");
            token.cancel();
        });

        self.run().await;
        Ok(())
    }
}

/// Tick `controller` until `shutdown` fires, then tear it down.
async fn drive(
    name: String,
    period: Duration,
    mut controller: Box<dyn Controller>,
    shutdown: CancellationToken,
) {
    // The immediate reconcile already happened at startup.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = ticker.tick() => reconcile_once(&name, controller.as_mut()).await,
        }
    }

    debug!(controller = %name, "tearing down");
    if AssertUnwindSafe(controller.reconcile_delete()).catch_unwind().await.is_err() {
        error!(controller = %name, "teardown panicked");
    }
    info!(controller = %name, "controller stopped");
}

async fn reconcile_once(name: &str, controller: &mut dyn Controller) {
    match AssertUnwindSafe(controller.reconcile()).catch_unwind().await {
        Ok(Ok(())) => debug!(controller = name, "reconciled"),
        Ok(Err(e)) => error!(controller = name, err = %e, "reconcile failed"),
        Err(_) => error!(controller = name, "reconcile panicked"),
    }
}
