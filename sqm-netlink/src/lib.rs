#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Kernel-facing plumbing for sqm.
//!
//! The [`Netlink`] trait is the complete set of kernel operations the reconciliation engine
//! needs: interface lookup and lifecycle, CAKE replacement, ingress qdisc management and the
//! redirect filter. [`RtNetlink`] implements it on top of an rtnetlink socket; tests implement
//! it in memory.

use std::io;

use async_trait::async_trait;
use nix::libc::{EEXIST, ENODEV, ENOENT};

pub mod link;
mod rtnl;
pub mod tc;

pub use link::{Link, LinkKind, LinkSpec, OperState};
pub use rtnetlink::packet_route::tc::TcHandle;
pub use rtnl::RtNetlink;

use tc::{
    cake::QdiscCakeRequest, filter::U32RedirectFilterRequest, handle::QdiscRequestInner,
    ingress::QdiscIngressRequest,
};

// -------------------------------------------------------------------------------------
// Error Handling
// -------------------------------------------------------------------------------------

/// Errors returned by kernel operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Error reported by the kernel or the rtnetlink handle.
    #[error("rtnetlink error: {0}")]
    RtNetlink(#[from] rtnetlink::Error),

    /// No interface with this name.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The kernel answered with something that can't be interpreted.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Whether the kernel rejected a request with the given errno.
    pub fn is_errno(&self, errno: i32) -> bool {
        match self {
            Self::RtNetlink(rtnetlink::Error::NetlinkError(message)) => {
                message.code.is_some_and(|code| code.get() == -errno)
            }
            Self::Io(e) => e.raw_os_error() == Some(errno),
            _ => false,
        }
    }

    /// Whether the addressed object doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_)) || self.is_errno(ENODEV) || self.is_errno(ENOENT)
    }

    /// Whether an exclusive create collided with an existing object.
    pub fn is_already_exists(&self) -> bool {
        self.is_errno(EEXIST)
    }
}

/// Result type for kernel operations.
pub type Result<T> = std::result::Result<T, Error>;

// -------------------------------------------------------------------------------------
// Dumped objects
// -------------------------------------------------------------------------------------

/// A qdisc as reported by a dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qdisc {
    /// Interface the qdisc is attached to.
    pub interface_index: i32,
    /// The qdisc's own handle.
    pub handle: TcHandle,
    /// Where it attaches.
    pub parent: TcHandle,
    /// `TCA_KIND`, e.g. `cake` or `ingress`.
    pub kind: String,
}

impl Qdisc {
    /// Whether this qdisc sits in the ingress slot of its interface.
    pub fn is_ingress(&self) -> bool {
        self.parent == TcHandle::INGRESS
    }

    /// Addressing to delete or re-target this qdisc.
    pub fn request_inner(&self) -> QdiscRequestInner {
        QdiscRequestInner::new(self.interface_index)
            .with_parent(self.parent)
            .with_handle(self.handle)
    }
}

/// A filter as reported by a dump. Only the fields sqm inspects are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Interface the filter is attached to.
    pub interface_index: i32,
    /// Qdisc the filter sits under.
    pub parent: TcHandle,
    /// `TCA_KIND`, e.g. `u32`.
    pub kind: String,
    /// Filter priority, the upper half of `tcm_info`.
    pub priority: u16,
}

// -------------------------------------------------------------------------------------
// Operations
// -------------------------------------------------------------------------------------

/// Kernel operations consumed by the reconciliation engine.
///
/// Implementations must be safe to share between controllers running concurrently.
#[async_trait]
pub trait Netlink: std::fmt::Debug + Send + Sync + 'static {
    /// Look up an interface by name. Fails with [`Error::DeviceNotFound`] if it doesn't exist.
    async fn link_by_name(&self, name: &str) -> Result<Link>;

    /// Create an interface.
    async fn add_link(&self, spec: &LinkSpec) -> Result<()>;

    /// Delete the interface with the given index.
    async fn delete_link(&self, index: u32) -> Result<()>;

    /// Set the interface administratively up.
    async fn set_link_up(&self, index: u32) -> Result<()>;

    /// Create or replace a CAKE qdisc.
    async fn replace_cake(&self, request: QdiscCakeRequest) -> Result<()>;

    /// List the qdiscs attached to an interface.
    async fn qdiscs(&self, interface_index: i32) -> Result<Vec<Qdisc>>;

    /// Create the ingress qdisc.
    async fn add_ingress_qdisc(&self, request: QdiscIngressRequest) -> Result<()>;

    /// Delete the qdisc addressed by `inner`, along with its filters.
    async fn delete_qdisc(&self, inner: QdiscRequestInner) -> Result<()>;

    /// List the filters attached under `inner.parent` on `inner.interface_index`.
    async fn filters(&self, inner: QdiscRequestInner) -> Result<Vec<Filter>>;

    /// Create the ingress redirect filter.
    async fn add_redirect_filter(&self, request: U32RedirectFilterRequest) -> Result<()>;
}
