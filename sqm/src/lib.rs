#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Smart queue management for a single WAN link.
//!
//! sqm keeps a CAKE shaper on both directions of an interface, sized to the line rate the
//! modem reports. Ingress traffic is redirected to an ifb device so it can be shaped on the
//! way out of it.
//!
//! The work is split across independent [`controller`]s, each ticked on its own schedule by
//! the [`Manager`]. They coordinate only through the [`SharedState`].

use std::sync::Arc;

use sqm_netlink::Netlink;

pub mod config;
pub mod controller;
pub mod error;
pub mod manager;
pub mod rates;
pub mod state;

pub use config::Options;
pub use error::{Dependency, Error, Result};
pub use manager::Manager;
pub use state::{Direction, SharedState};

use controller::{DeviceController, RatePoller, RedirectController, ShaperController};
use rates::RateSource;

/// Registration names, in registration order.
pub mod names {
    /// The [`RatePoller`](crate::controller::RatePoller).
    pub const RATE_POLLER: &str = "SNMP";
    /// The physical device's [`DeviceController`](crate::controller::DeviceController).
    pub const ROOT_DEVICE: &str = "Root Device";
    /// The ifb device's [`DeviceController`](crate::controller::DeviceController).
    pub const IFB_DEVICE: &str = "IFB Device";
    /// The egress [`ShaperController`](crate::controller::ShaperController).
    pub const EGRESS_SHAPER: &str = "Root Device Shaper";
    /// The ingress [`ShaperController`](crate::controller::ShaperController).
    pub const INGRESS_SHAPER: &str = "IFB Device Shaper";
    /// The [`RedirectController`](crate::controller::RedirectController).
    pub const REDIRECTOR: &str = "Redirector";
}

/// Register the six controllers that make up sqm.
///
/// Fast-moving facts (rates, devices) are checked every poll interval; the kernel
/// configuration that depends on them every shape interval.
pub fn register_controllers(
    manager: &mut Manager,
    options: &Options,
    netlink: Arc<dyn Netlink>,
    rates: Box<dyn RateSource>,
) {
    let state = Arc::clone(manager.state());
    let poll = options.poll_interval();
    let shape = options.shape_interval();

    manager.add_controller(names::RATE_POLLER, poll, RatePoller::new(rates, Arc::clone(&state)));
    manager.add_controller(
        names::ROOT_DEVICE,
        poll,
        DeviceController::root(&options.interface, Arc::clone(&netlink), Arc::clone(&state)),
    );
    manager.add_controller(
        names::IFB_DEVICE,
        poll,
        DeviceController::ifb(&options.interface, Arc::clone(&netlink), Arc::clone(&state)),
    );
    manager.add_controller(
        names::EGRESS_SHAPER,
        shape,
        ShaperController::new(Direction::Egress, Arc::clone(&netlink), Arc::clone(&state))
            .with_overhead(options.overhead),
    );
    manager.add_controller(
        names::INGRESS_SHAPER,
        shape,
        ShaperController::new(Direction::Ingress, Arc::clone(&netlink), Arc::clone(&state))
            .with_overhead(options.overhead),
    );
    manager.add_controller(names::REDIRECTOR, shape, RedirectController::new(netlink, state));
}
