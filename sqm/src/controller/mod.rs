//! Controllers converge one piece of the system toward its desired state.
//!
//! Each controller is driven by the [`Manager`](crate::manager::Manager) on its own timer.
//! A controller reads what it depends on from the shared state and, when a dependency hasn't
//! been published yet, fails with [`Error::NotReady`](crate::Error::NotReady) and waits for
//! its next tick. There is no other ordering between controllers.
//!
//! ```text
//!   RatePoller ──────────────► rates ─────────────┐
//!   DeviceController (root) ─► root device ──┬────┼──► ShaperController (egress)
//!   DeviceController (ifb) ──► ifb device ───┼────┴──► ShaperController (ingress)
//!                                            └───────► RedirectController
//! ```

use async_trait::async_trait;

use crate::error::Result;

mod device;
pub use device::{DeviceController, IFB_PREFIX, ifb_name};

mod rate;
pub use rate::RatePoller;

mod redirect;
pub use redirect::RedirectController;

mod shaper;
pub use shaper::ShaperController;

/// A unit of reconciliation.
#[async_trait]
pub trait Controller: Send + 'static {
    /// Converge observed state toward desired state.
    ///
    /// Must be idempotent: calling it again when nothing changed has no side effects.
    async fn reconcile(&mut self) -> Result<()>;

    /// Undo whatever [`reconcile`](Controller::reconcile) created.
    ///
    /// Called exactly once at shutdown, whether or not any reconcile succeeded. Failures are
    /// logged here, not returned.
    async fn reconcile_delete(&mut self);
}

