//! CAKE (Common Applications Kept Enhanced) qdisc support.
//!
//! CAKE is a shaper and AQM in one. It is configured entirely through nested `TCA_CAKE_*`
//! attributes, and because every request sets every attribute sqm cares about, a replace
//! fully overwrites the previous configuration: there is nothing left over to merge.

use rtnetlink::packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_REPLACE, NLM_F_REQUEST, NetlinkMessage};
use rtnetlink::packet_route::{
    RouteNetlinkMessage,
    tc::{TcAttribute, TcMessage},
};

use super::handle::QdiscRequestInner;
use super::nla::{build_nested_options, build_nla, build_nla_u32};

// CAKE TCA_OPTIONS sub-attributes (from linux/pkt_sched.h)
const TCA_CAKE_BASE_RATE64: u16 = 2;
const TCA_CAKE_DIFFSERV_MODE: u16 = 3;
const TCA_CAKE_ATM: u16 = 4;
const TCA_CAKE_OVERHEAD: u16 = 6;
const TCA_CAKE_NAT: u16 = 11;
const TCA_CAKE_ACK_FILTER: u16 = 16;
const TCA_CAKE_SPLIT_GSO: u16 = 17;

/// Qdisc kind string.
pub const CAKE_KIND: &str = "cake";

/// Bytes per second in one kilobit per second (1000 / 8).
pub const KBPS_TO_BYTES_PER_SEC: u64 = 125;

/// Per-packet framing overhead for a PPPoE/VDSL line, in bytes.
pub const DEFAULT_OVERHEAD: i32 = 68;

/// Priority tin layout (`CAKE_DIFFSERV_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DiffservMode {
    /// Bulk, best effort and voice tins.
    Diffserv3 = 0,
    /// Bulk, best effort, video and voice tins.
    Diffserv4 = 1,
    /// Eight tins.
    Diffserv8 = 2,
    /// A single tin.
    Besteffort = 3,
    /// Tins by legacy IP precedence.
    Precedence = 4,
}

/// Cell framing compensation (`CAKE_ATM_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AtmMode {
    /// No compensation.
    None = 0,
    /// ATM cell framing, used by ADSL.
    Atm = 1,
    /// PTM 64b/65b encoding, used by VDSL2.
    Ptm = 2,
}

/// ACK filtering (`CAKE_ACK_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AckFilter {
    /// Keep every ACK.
    None = 0,
    /// Drop ACKs made redundant by a later one.
    Filter = 1,
    /// Drop ACKs more eagerly.
    Aggressive = 2,
}

/// The subset of CAKE options sqm programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CakeOptions {
    /// Shaped rate in bytes per second.
    pub base_rate: u64,
    /// Tin layout.
    pub diffserv: DiffservMode,
    /// Link layer framing.
    pub atm: AtmMode,
    /// Per-packet overhead in bytes.
    pub overhead: i32,
    /// Look up the pre-NAT 5-tuple for flow isolation.
    pub nat: bool,
    /// ACK filtering mode.
    pub ack_filter: AckFilter,
    /// Split GSO super-packets before queueing.
    pub split_gso: bool,
}

impl CakeOptions {
    /// Options for a line advertised at `rate_kbps`, or `None` if the rate overflows a `u64`
    /// once converted to bytes per second.
    ///
    /// ```
    /// use sqm_netlink::tc::cake::CakeOptions;
    /// assert_eq!(CakeOptions::from_kbps(25_000).unwrap().base_rate, 3_125_000);
    /// assert!(CakeOptions::from_kbps(u64::MAX).is_none());
    /// ```
    pub fn from_kbps(rate_kbps: u64) -> Option<Self> {
        Some(Self {
            base_rate: rate_kbps.checked_mul(KBPS_TO_BYTES_PER_SEC)?,
            diffserv: DiffservMode::Diffserv3,
            atm: AtmMode::Ptm,
            overhead: DEFAULT_OVERHEAD,
            nat: true,
            ack_filter: AckFilter::Filter,
            split_gso: true,
        })
    }

    /// Set the per-packet overhead.
    pub fn with_overhead(mut self, overhead: i32) -> Self {
        self.overhead = overhead;
        self
    }

    /// Encode the options as the payload of `TCA_OPTIONS`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut nlas = build_nla(TCA_CAKE_BASE_RATE64, &self.base_rate.to_ne_bytes());
        nlas.extend(build_nla_u32(TCA_CAKE_DIFFSERV_MODE, self.diffserv as u32));
        nlas.extend(build_nla_u32(TCA_CAKE_ATM, self.atm as u32));
        nlas.extend(build_nla(TCA_CAKE_OVERHEAD, &self.overhead.to_ne_bytes()));
        nlas.extend(build_nla_u32(TCA_CAKE_NAT, self.nat as u32));
        nlas.extend(build_nla_u32(TCA_CAKE_ACK_FILTER, self.ack_filter as u32));
        nlas.extend(build_nla_u32(TCA_CAKE_SPLIT_GSO, self.split_gso as u32));
        nlas
    }
}

/// Builder for a CAKE qdisc.
///
/// The request always creates or replaces: whatever sits at the same parent is swapped out.
///
/// # Example
///
/// ```
/// use sqm_netlink::tc::cake::{CakeOptions, QdiscCakeRequest};
/// use sqm_netlink::tc::handle::{QdiscRequestInner, INGRESS_SHAPER_MAJOR, make_handle};
///
/// let if_index = 7; // the ifb device
/// let request = QdiscCakeRequest::new(
///     QdiscRequestInner::new(if_index).with_handle(make_handle(INGRESS_SHAPER_MAJOR, 0)),
///     CakeOptions::from_kbps(25_000).unwrap(),
/// )
/// .build();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QdiscCakeRequest {
    /// Target interface, parent and handle.
    pub inner: QdiscRequestInner,
    /// CAKE parameters.
    pub options: CakeOptions,
}

impl QdiscCakeRequest {
    /// Create a new CAKE qdisc request.
    pub fn new(inner: QdiscRequestInner, options: CakeOptions) -> Self {
        Self { inner, options }
    }

    /// Build the netlink message for this CAKE qdisc.
    pub fn build(self) -> NetlinkMessage<RouteNetlinkMessage> {
        let mut tc_message = TcMessage::with_index(self.inner.interface_index);
        tc_message.header.parent = self.inner.parent;
        tc_message.header.handle = self.inner.handle;

        tc_message.attributes.push(TcAttribute::Kind(CAKE_KIND.to_string()));
        tc_message
            .attributes
            .push(TcAttribute::Other(build_nested_options(self.options.to_bytes())));

        let mut nl_req = NetlinkMessage::from(RouteNetlinkMessage::NewQueueDiscipline(tc_message));
        nl_req.header.flags = NLM_F_CREATE | NLM_F_REPLACE | NLM_F_REQUEST | NLM_F_ACK;

        tracing::debug!(?nl_req, "sending cake request");

        nl_req
    }
}
