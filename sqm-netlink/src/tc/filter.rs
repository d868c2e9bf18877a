//! The u32 + mirred redirect filter.
//!
//! Traffic arriving on the physical link can't be shaped there: qdiscs only act on egress. The
//! usual trick is to attach a match-all filter to the physical link's ingress qdisc whose
//! `mirred` action steals every packet and re-injects it as egress on an ifb device, where a
//! regular shaping qdisc takes over.
//!
//! ```text
//!   ppp0 ingress ──► ingress qdisc (ffff:) ──► u32 match-all ──► mirred egress redirect
//!                                                                        │
//!                                                                        ▼
//!                                                         ifb4ppp0 egress ──► CAKE (8013:)
//! ```

use rtnetlink::packet_core::{NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST, NetlinkMessage};
use rtnetlink::packet_route::{
    RouteNetlinkMessage,
    tc::{TcAttribute, TcHandle, TcMessage},
};

use super::handle::{QdiscRequestInner, ingress_qdisc_handle};
use super::nla::{build_nested_options, build_nla, build_nla_str, build_nla_u32};

/// EtherType for matching all protocols supported by Ethernet.
const ETH_P_ALL: u16 = nix::libc::ETH_P_ALL as u16;

/// Priority of the redirect filter, `tc filter ... prio 10`.
pub const DEFAULT_PRIORITY: u16 = 10;

/// Class id the filter reports, `flowid 1:1`. Nothing consumes it on ingress.
pub const DEFAULT_CLASS_ID: u32 = 0x0001_0001;

/// The filter kind the redirect is created as. Listing code matches on it.
pub const U32_KIND: &str = "u32";

// U32 filter TCA_OPTIONS sub-attributes (from linux/pkt_cls.h)
const TCA_U32_CLASSID: u16 = 1;
const TCA_U32_SEL: u16 = 5;
const TCA_U32_ACT: u16 = 7;

// U32 filter flags (from linux/pkt_cls.h)
/// Marks a u32 filter as terminal - required for the filter to return a classification result.
const TC_U32_TERMINAL: u8 = 1;

// Action attributes (from linux/pkt_cls.h and linux/tc_act/tc_mirred.h)
const TCA_ACT_KIND: u16 = 1;
const TCA_ACT_OPTIONS: u16 = 2;
const TCA_MIRRED_PARMS: u16 = 2;
/// Order of the action within the action table. Actions are numbered from 1.
const ACTION_ORDER: u16 = 1;

/// Redirect to the target device's egress path.
const TCA_EGRESS_REDIR: i32 = 1;
/// Verdict that consumes the packet on the original device.
const TC_ACT_STOLEN: i32 = 4;

/// The kernel's `tc_u32_sel` structure, limited to what a match-all selector needs.
///
/// The full structure is followed by `nkeys` `tc_u32_key` entries.
#[derive(Debug, Clone, Copy, Default)]
struct TcU32Sel {
    flags: u8,
    offshift: u8,
    nkeys: u8,
    offmask: u16,
    off: u16,
    offoff: i16,
    hoff: i16,
    hmask: u32,
}

/// The kernel's `tc_u32_key` structure. All zeros means "mask nothing", i.e. match everything.
#[derive(Debug, Clone, Copy, Default)]
struct TcU32Key {
    mask: u32,
    val: u32,
    off: i32,
    offmask: i32,
}

impl TcU32Sel {
    /// A terminal selector with a single all-zero key: `match u32 0 0`.
    fn match_all() -> (Self, TcU32Key) {
        (Self { flags: TC_U32_TERMINAL, nkeys: 1, ..Default::default() }, TcU32Key::default())
    }

    fn to_bytes(self, key: TcU32Key) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + 16);
        bytes.push(self.flags);
        bytes.push(self.offshift);
        bytes.push(self.nkeys);
        bytes.push(0); // padding
        bytes.extend_from_slice(&self.offmask.to_ne_bytes());
        bytes.extend_from_slice(&self.off.to_ne_bytes());
        bytes.extend_from_slice(&self.offoff.to_ne_bytes());
        bytes.extend_from_slice(&self.hoff.to_ne_bytes());
        bytes.extend_from_slice(&self.hmask.to_ne_bytes());
        bytes.extend_from_slice(&key.mask.to_ne_bytes());
        bytes.extend_from_slice(&key.val.to_ne_bytes());
        bytes.extend_from_slice(&key.off.to_ne_bytes());
        bytes.extend_from_slice(&key.offmask.to_ne_bytes());
        bytes
    }
}

/// The kernel's `tc_mirred` structure.
///
/// From `<linux/tc_act/tc_mirred.h>`:
///
/// ```c
/// struct tc_mirred {
///     tc_gen;          /* index, capab, action, refcnt, bindcnt */
///     int eaction;     /* one of IN/EGRESS_MIRROR/REDIR */
///     __u32 ifindex;   /* ifindex of egress port */
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TcMirred {
    action: i32,
    eaction: i32,
    ifindex: u32,
}

impl TcMirred {
    fn egress_redirect(ifindex: u32) -> Self {
        Self { action: TC_ACT_STOLEN, eaction: TCA_EGRESS_REDIR, ifindex }
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(28);
        bytes.extend_from_slice(&0u32.to_ne_bytes()); // index, kernel-assigned
        bytes.extend_from_slice(&0u32.to_ne_bytes()); // capab
        bytes.extend_from_slice(&self.action.to_ne_bytes());
        bytes.extend_from_slice(&0i32.to_ne_bytes()); // refcnt
        bytes.extend_from_slice(&0i32.to_ne_bytes()); // bindcnt
        bytes.extend_from_slice(&self.eaction.to_ne_bytes());
        bytes.extend_from_slice(&self.ifindex.to_ne_bytes());
        bytes
    }

    /// Encode as a one-entry action table, the payload of `TCA_U32_ACT`.
    fn to_action_table(self) -> Vec<u8> {
        let mut action = build_nla_str(TCA_ACT_KIND, "mirred");
        action.extend(build_nla(TCA_ACT_OPTIONS, &build_nla(TCA_MIRRED_PARMS, &self.to_bytes())));
        build_nla(ACTION_ORDER, &action)
    }
}

/// Builder for the ingress redirect filter.
///
/// Equivalent to:
///
/// ```text
/// tc filter add dev <dev> parent ffff: protocol all prio 10 u32 match u32 0 0 flowid 1:1 \
///     action mirred egress redirect dev <target>
/// ```
///
/// # Example
///
/// ```
/// use sqm_netlink::tc::filter::U32RedirectFilterRequest;
///
/// let physical = 2;
/// let ifb = 9;
/// let request = U32RedirectFilterRequest::new(physical, ifb).build();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U32RedirectFilterRequest {
    /// Physical interface and the ingress qdisc as parent.
    pub inner: QdiscRequestInner,
    /// Index of the device traffic is redirected to.
    pub target_index: u32,
    /// Filter priority.
    pub priority: u16,
    /// Flow id the u32 match classifies into.
    pub class_id: u32,
}

impl U32RedirectFilterRequest {
    /// Redirect everything arriving on `interface_index` to `target_index`, attached to the
    /// ingress qdisc at `ffff:0`.
    pub fn new(interface_index: i32, target_index: u32) -> Self {
        Self {
            inner: QdiscRequestInner::new(interface_index).with_parent(ingress_qdisc_handle()),
            target_index,
            priority: DEFAULT_PRIORITY,
            class_id: DEFAULT_CLASS_ID,
        }
    }

    /// Attach under a different parent, e.g. an ingress qdisc found with a non-default handle.
    pub fn with_parent(mut self, parent: TcHandle) -> Self {
        self.inner = self.inner.with_parent(parent);
        self
    }

    /// Set the filter priority.
    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    /// Encode the `TCA_OPTIONS` payload.
    fn options(&self) -> Vec<u8> {
        let (sel, key) = TcU32Sel::match_all();

        let mut options = build_nla_u32(TCA_U32_CLASSID, self.class_id);
        options.extend(build_nla(TCA_U32_SEL, &sel.to_bytes(key)));
        options.extend(build_nla(
            TCA_U32_ACT,
            &TcMirred::egress_redirect(self.target_index).to_action_table(),
        ));
        options
    }

    /// Build the netlink message to create this filter.
    pub fn build(self) -> NetlinkMessage<RouteNetlinkMessage> {
        let mut tc_msg = TcMessage::with_index(self.inner.interface_index);
        tc_msg.header.parent = self.inner.parent;
        tc_msg.header.handle = TcHandle::from(0u32);
        // Priority in the upper half, protocol in network byte order in the lower half.
        tc_msg.header.info = ((self.priority as u32) << 16) | (ETH_P_ALL.to_be() as u32);

        tc_msg.attributes.push(TcAttribute::Kind(U32_KIND.to_string()));
        tc_msg.attributes.push(TcAttribute::Other(build_nested_options(self.options())));

        let mut nl_req = NetlinkMessage::from(RouteNetlinkMessage::NewTrafficFilter(tc_msg));
        nl_req.header.flags = NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL;

        tracing::debug!(?nl_req, "sending redirect filter request");

        nl_req
    }
}
