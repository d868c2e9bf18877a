//! Network interface descriptions.

use std::fmt;

use rtnetlink::packet_route::link::{
    InfoKind, LinkAttribute, LinkInfo, LinkMessage, State as NetlinkState,
};

/// Operational state of an interface, as reported in `IFLA_OPERSTATE` (RFC 2863).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperState {
    /// Drivers that don't track carrier report this. Virtual devices like ifb usually do.
    #[default]
    Unknown,
    /// Carrier present.
    Up,
    /// No carrier, or administratively down.
    Down,
    /// Not present, lower layer down, testing or dormant.
    Other,
}

impl OperState {
    /// Whether the interface passes traffic, or at least doesn't report that it can't.
    pub const fn is_up_or_unknown(self) -> bool {
        matches!(self, Self::Up | Self::Unknown)
    }
}

impl From<NetlinkState> for OperState {
    fn from(state: NetlinkState) -> Self {
        match state {
            NetlinkState::Up => Self::Up,
            NetlinkState::Down => Self::Down,
            NetlinkState::Unknown => Self::Unknown,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Up => "up",
            Self::Down => "down",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// An existing network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Interface name.
    pub name: String,
    /// Kernel interface index.
    pub index: u32,
    /// MTU in bytes.
    pub mtu: u32,
    /// `IFLA_OPERSTATE`.
    pub oper_state: OperState,
}

impl Link {
    /// Whether `other` describes the same device with the same MTU.
    ///
    /// Name and operational state are ignored: a rename or carrier flap doesn't invalidate
    /// anything configured against the index.
    pub fn same_device(&self, other: &Self) -> bool {
        self.index == other.index && self.mtu == other.mtu
    }

    /// The index in the signed form `tcmsg` uses.
    pub fn tc_index(&self) -> i32 {
        self.index as i32
    }
}

impl From<LinkMessage> for Link {
    fn from(message: LinkMessage) -> Self {
        let mut link = Self {
            name: String::new(),
            index: message.header.index,
            mtu: 0,
            oper_state: OperState::default(),
        };

        for attribute in message.attributes {
            match attribute {
                LinkAttribute::IfName(name) => link.name = name,
                LinkAttribute::Mtu(mtu) => link.mtu = mtu,
                LinkAttribute::OperState(state) => link.oper_state = state.into(),
                _ => {}
            }
        }

        link
    }
}

/// Kinds of interface sqm creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Intermediate Functional Block, the target of ingress redirection.
    Ifb,
}

impl LinkKind {
    fn info_kind(self) -> InfoKind {
        match self {
            Self::Ifb => InfoKind::Ifb,
        }
    }
}

/// Parameters for creating an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    /// Interface name.
    pub name: String,
    /// MTU in bytes.
    pub mtu: u32,
    /// Link type.
    pub kind: LinkKind,
}

impl LinkSpec {
    /// An ifb device with the given name and MTU.
    pub fn ifb(name: impl Into<String>, mtu: u32) -> Self {
        Self { name: name.into(), mtu, kind: LinkKind::Ifb }
    }

    /// Build the `RTM_NEWLINK` payload for this interface.
    pub fn to_message(&self) -> LinkMessage {
        let mut message = LinkMessage::default();
        message.attributes.push(LinkAttribute::IfName(self.name.clone()));
        message.attributes.push(LinkAttribute::Mtu(self.mtu));
        message
            .attributes
            .push(LinkAttribute::LinkInfo(vec![LinkInfo::Kind(self.kind.info_kind())]));
        message
    }
}
