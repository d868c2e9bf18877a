//! TC handle numbering and common request addressing.
//!
//! TC handles are 32-bit values split into major:minor (16:16 bits). The handles used by sqm
//! are fixed so that repeated runs, and restarts of the daemon, address the same objects.
//!
//! | Component                | Handle       | Parent        |
//! |--------------------------|--------------|---------------|
//! | Egress CAKE (physical)   | `8012:0`     | root          |
//! | Ingress CAKE (ifb)       | `8013:0`     | root          |
//! | Ingress qdisc (physical) | `ffff:0`     | `ffff:fff1`   |
//! | Redirect u32 filter      | kernel-chosen| `ffff:0`      |

use rtnetlink::packet_route::tc::TcHandle;

/// Major number of the CAKE qdisc shaping egress traffic on the physical link.
pub const EGRESS_SHAPER_MAJOR: u16 = 0x8012;

/// Major number of the CAKE qdisc shaping redirected ingress traffic on the ifb link.
pub const INGRESS_SHAPER_MAJOR: u16 = 0x8013;

/// Major number of the ingress qdisc. `tc` calls this `ffff:`.
pub const INGRESS_QDISC_MAJOR: u16 = 0xffff;

/// Build a handle from its major and minor parts.
pub const fn make_handle(major: u16, minor: u16) -> TcHandle {
    TcHandle { major, minor }
}

/// The handle the ingress qdisc is created with, `ffff:0`.
pub const fn ingress_qdisc_handle() -> TcHandle {
    make_handle(INGRESS_QDISC_MAJOR, 0)
}

/// Render a handle the way `tc` prints it, e.g. `8013:0`.
pub fn display_handle(handle: TcHandle) -> String {
    format!("{:x}:{:x}", handle.major, handle.minor)
}

/// Common fields shared by all qdisc/filter requests.
///
/// This captures the addressing needed to target a qdisc or filter in the traffic control
/// hierarchy of one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QdiscRequestInner {
    /// The network interface index.
    pub interface_index: i32,
    /// Where this qdisc/filter attaches.
    pub parent: TcHandle,
    /// This qdisc's own handle. Left at zero for filters so the kernel assigns one.
    pub handle: TcHandle,
}

impl QdiscRequestInner {
    /// Create a new request for the given interface, defaulting to root parent.
    pub fn new(index: i32) -> Self {
        Self { interface_index: index, parent: TcHandle::ROOT, handle: TcHandle::default() }
    }

    /// Set the parent handle.
    pub fn with_parent(mut self, parent: TcHandle) -> Self {
        self.parent = parent;
        self
    }

    /// Set this qdisc's handle.
    pub fn with_handle(mut self, handle: TcHandle) -> Self {
        self.handle = handle;
        self
    }
}
