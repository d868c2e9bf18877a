//! The shared record of discovered facts.
//!
//! One [`SharedState`] is created by the [`Manager`](crate::manager::Manager) and handed to
//! every controller at construction. Controllers never talk to each other; they publish what
//! they learn here and read what they depend on from here.
//!
//! # Synchronization
//!
//! Writes are exclusive and change-detecting: a write that doesn't change anything reports
//! `false` and leaves the slot alone.
//!
//! Reads are deliberately asymmetric. Rates are read with a plain atomic load and no lock: a
//! reader racing a writer sees either the old or the new value, both of which are valid
//! rates, and the next tick picks up the new one anyway. Device slots are read under their
//! lock, because whether a device is present decides whether dependent controllers act at
//! all.

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{Mutex, RwLock};
use sqm_netlink::Link;

use crate::error::{Dependency, Error, Result};

/// Which way traffic flows, from the point of view of the physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Download. Shaped on the ifb device after redirection.
    Ingress,
    /// Upload. Shaped on the physical device.
    Egress,
}

/// Rates in kbit/s and the two managed devices.
#[derive(Debug, Default)]
pub struct SharedState {
    /// Serializes rate writers. Readers don't take it.
    rate_writer: Mutex<()>,
    ingress_rate: AtomicI64,
    egress_rate: AtomicI64,
    root_device: RwLock<Option<Link>>,
    ifb_device: RwLock<Option<Link>>,
}

impl SharedState {
    /// Creates an empty store: rates unknown (0), no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current ingress rate in kbit/s. 0 means unknown.
    pub fn ingress_rate(&self) -> i64 {
        self.ingress_rate.load(Ordering::Acquire)
    }

    /// Current egress rate in kbit/s. 0 means unknown.
    pub fn egress_rate(&self) -> i64 {
        self.egress_rate.load(Ordering::Acquire)
    }

    /// Rate for the given direction.
    pub fn rate(&self, direction: Direction) -> i64 {
        match direction {
            Direction::Ingress => self.ingress_rate(),
            Direction::Egress => self.egress_rate(),
        }
    }

    /// Returns `true` if the stored ingress rate changed.
    pub fn set_ingress_rate(&self, rate: i64) -> bool {
        self.swap_rate(&self.ingress_rate, rate)
    }

    /// Returns `true` if the stored egress rate changed.
    pub fn set_egress_rate(&self, rate: i64) -> bool {
        self.swap_rate(&self.egress_rate, rate)
    }

    fn swap_rate(&self, slot: &AtomicI64, rate: i64) -> bool {
        let _guard = self.rate_writer.lock();
        if slot.load(Ordering::Acquire) == rate {
            return false;
        }
        slot.store(rate, Ordering::Release);
        true
    }

    /// The physical device, or [`Error::NotReady`] if it hasn't been published.
    pub fn root_device(&self) -> Result<Link> {
        self.root_device.read().clone().ok_or(Error::NotReady(Dependency::RootDevice))
    }

    /// The ifb device, or [`Error::NotReady`] if it hasn't been published.
    pub fn ifb_device(&self) -> Result<Link> {
        self.ifb_device.read().clone().ok_or(Error::NotReady(Dependency::IfbDevice))
    }

    /// The device traffic in the given direction is shaped on.
    pub fn shaped_device(&self, direction: Direction) -> Result<Link> {
        match direction {
            Direction::Ingress => self.ifb_device(),
            Direction::Egress => self.root_device(),
        }
    }

    /// Returns `true` unless the stored device has the same index and MTU as `link`.
    pub fn set_root_device(&self, link: Link) -> bool {
        replace_device(&self.root_device, link)
    }

    /// Returns `true` unless the stored device has the same index and MTU as `link`.
    pub fn set_ifb_device(&self, link: Link) -> bool {
        replace_device(&self.ifb_device, link)
    }

    /// Whether the physical device has been published.
    pub fn root_device_ready(&self) -> bool {
        self.root_device.read().is_some()
    }

    /// Whether the ifb device has been published.
    pub fn ifb_device_ready(&self) -> bool {
        self.ifb_device.read().is_some()
    }

    /// Whether a non-zero ingress rate has been published.
    pub fn ingress_rate_known(&self) -> bool {
        self.ingress_rate() != 0
    }

    /// Whether a non-zero egress rate has been published.
    pub fn egress_rate_known(&self) -> bool {
        self.egress_rate() != 0
    }
}

fn replace_device(slot: &RwLock<Option<Link>>, link: Link) -> bool {
    let mut current = slot.write();
    if current.as_ref().is_some_and(|existing| existing.same_device(&link)) {
        return false;
    }
    *current = Some(link);
    true
}
