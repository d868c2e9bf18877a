//! Netlink attribute encoding.
//!
//! Qdisc and filter options are carried as nested TLV attributes inside `TCA_OPTIONS`. The
//! typed attribute enums in `netlink-packet-route` don't cover CAKE or the mirred action, so
//! those payloads are assembled by hand with the helpers below.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Length (2 bytes) │  Type (2 bytes)     │  <- NLA header (4 bytes)
//! ├─────────────────────────────────────────┤
//! │  Value (variable length, padded to 4)   │
//! └─────────────────────────────────────────┘
//! ```

use nix::libc::TCA_OPTIONS;
use rtnetlink::packet_core::{DefaultNla, NLA_HEADER_SIZE};

/// Encode a single attribute: header, value and zero padding up to the next 4-byte boundary.
///
/// The length in the header covers header and value, never the padding.
pub(crate) fn build_nla(nla_type: u16, value: &[u8]) -> Vec<u8> {
    let nla_len = NLA_HEADER_SIZE + value.len();
    let padded_len = (nla_len + 3) & !3;

    let mut buf = vec![0u8; padded_len];
    buf[0..2].copy_from_slice(&(nla_len as u16).to_ne_bytes());
    buf[2..4].copy_from_slice(&nla_type.to_ne_bytes());
    buf[NLA_HEADER_SIZE..NLA_HEADER_SIZE + value.len()].copy_from_slice(value);

    buf
}

/// Encode a `u32` attribute.
pub(crate) fn build_nla_u32(nla_type: u16, value: u32) -> Vec<u8> {
    build_nla(nla_type, &value.to_ne_bytes())
}

/// Encode a NUL-terminated string attribute, as the kernel expects for `*_KIND` attributes.
pub(crate) fn build_nla_str(nla_type: u16, value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    build_nla(nla_type, &bytes)
}

/// Wrap already-encoded sub-attributes into `TCA_OPTIONS`, ready to push onto a `TcMessage`.
pub(crate) fn build_nested_options(sub_attrs: Vec<u8>) -> DefaultNla {
    DefaultNla::new(TCA_OPTIONS, sub_attrs)
}
