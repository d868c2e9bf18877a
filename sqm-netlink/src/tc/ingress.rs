//! The ingress qdisc and qdisc/filter dumps.
//!
//! The ingress qdisc is the attachment point for filters that see packets as they arrive on an
//! interface. It has no queue; it only classifies. Deleting it removes every filter attached
//! to it.

use rtnetlink::packet_core::{
    NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST, NetlinkMessage,
};
use rtnetlink::packet_route::{
    RouteNetlinkMessage,
    tc::{TcAttribute, TcHandle, TcMessage},
};

use super::handle::{QdiscRequestInner, ingress_qdisc_handle};

/// Builder for the ingress qdisc, `tc qdisc add dev <dev> handle ffff: ingress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QdiscIngressRequest {
    /// Interface, `ffff:fff1` parent and `ffff:` handle.
    pub inner: QdiscRequestInner,
}

impl QdiscIngressRequest {
    /// Target the ingress slot of the given interface, with the well-known `ffff:0` handle.
    pub fn new(interface_index: i32) -> Self {
        Self {
            inner: QdiscRequestInner::new(interface_index)
                .with_parent(TcHandle::INGRESS)
                .with_handle(ingress_qdisc_handle()),
        }
    }

    /// Build the netlink message to create the ingress qdisc.
    ///
    /// Uses `NLM_F_EXCL`: if another agent created one in the meantime the kernel answers
    /// `EEXIST`, which callers treat as success after re-listing.
    pub fn build(self) -> NetlinkMessage<RouteNetlinkMessage> {
        let mut tc_message = TcMessage::with_index(self.inner.interface_index);
        tc_message.header.parent = self.inner.parent;
        tc_message.header.handle = self.inner.handle;
        tc_message.attributes.push(TcAttribute::Kind("ingress".to_string()));

        let mut nl_req = NetlinkMessage::from(RouteNetlinkMessage::NewQueueDiscipline(tc_message));
        nl_req.header.flags = NLM_F_CREATE | NLM_F_EXCL | NLM_F_REQUEST | NLM_F_ACK;

        nl_req
    }
}

/// Build an `RTM_DELQDISC` request for the qdisc addressed by `inner`.
pub fn delete_qdisc_request(inner: QdiscRequestInner) -> NetlinkMessage<RouteNetlinkMessage> {
    let mut tc_message = TcMessage::with_index(inner.interface_index);
    tc_message.header.parent = inner.parent;
    tc_message.header.handle = inner.handle;

    let mut nl_req = NetlinkMessage::from(RouteNetlinkMessage::DelQueueDiscipline(tc_message));
    nl_req.header.flags = NLM_F_REQUEST | NLM_F_ACK;

    nl_req
}

/// Build an `RTM_GETQDISC` dump request.
///
/// The kernel dumps the qdiscs of every interface; callers filter on the interface index.
pub fn dump_qdiscs_request() -> NetlinkMessage<RouteNetlinkMessage> {
    let mut nl_req =
        NetlinkMessage::from(RouteNetlinkMessage::GetQueueDiscipline(TcMessage::default()));
    nl_req.header.flags = NLM_F_REQUEST | NLM_F_DUMP;

    nl_req
}

/// Build an `RTM_GETTFILTER` dump request for the filters attached under `inner.parent`.
pub fn dump_filters_request(inner: QdiscRequestInner) -> NetlinkMessage<RouteNetlinkMessage> {
    let mut tc_message = TcMessage::with_index(inner.interface_index);
    tc_message.header.parent = inner.parent;

    let mut nl_req = NetlinkMessage::from(RouteNetlinkMessage::GetTrafficFilter(tc_message));
    nl_req.header.flags = NLM_F_REQUEST | NLM_F_DUMP;

    nl_req
}
