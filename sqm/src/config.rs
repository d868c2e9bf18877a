//! Command-line options.

use std::time::Duration;

use clap::Parser;
use sqm_netlink::tc::cake::DEFAULT_OVERHEAD;

use crate::rates::{DEFAULT_EGRESS_OID, DEFAULT_INGRESS_OID, Oid};

/// Everything configurable from the command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "sqm", version)]
#[command(
    about = "Keep CAKE shaping in sync with the modem's line rate",
    long_about = "sqm sets up the CAKE scheduler in both directions on a PPP or ethernet \
                  interface, and polls the modem over SNMP to keep the bandwidth targets \
                  matched to the synchronised line rate."
)]
pub struct Options {
    /// Interface to shape.
    #[arg(short = 'd', long, default_value = "ppp0")]
    pub interface: String,

    /// SNMP OID reporting the ingress rate in kbit/s.
    #[arg(short = 'i', long, default_value = DEFAULT_INGRESS_OID)]
    pub ingress_oid: Oid,

    /// SNMP OID reporting the egress rate in kbit/s.
    #[arg(short = 'e', long, default_value = DEFAULT_EGRESS_OID)]
    pub egress_oid: Oid,

    /// SNMP host, optionally with a port.
    #[arg(short = 'l', long, default_value = "192.168.2.1")]
    pub snmp_host: String,

    /// SNMPv2c community string.
    #[arg(long, default_value = "public")]
    pub community: String,

    /// Seconds to wait for each SNMP response.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub snmp_timeout_secs: u64,

    /// Interval for the rate poller and the device controllers.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_secs: u64,

    /// Interval for the shapers and the redirector.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub shape_interval_secs: u64,

    /// Per-packet overhead in bytes passed to CAKE.
    #[arg(long, default_value_t = DEFAULT_OVERHEAD, allow_negative_numbers = true)]
    pub overhead: i32,
}

impl Options {
    /// SNMP response timeout.
    pub fn snmp_timeout(&self) -> Duration {
        Duration::from_secs(self.snmp_timeout_secs)
    }

    /// Interval for the fast-ticking controllers.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Interval for the controllers that touch tc.
    pub fn shape_interval(&self) -> Duration {
        Duration::from_secs(self.shape_interval_secs)
    }
}
