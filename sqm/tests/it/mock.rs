//! In-memory kernel and rate source.

use std::{io, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqm::rates::{Oid, QueryError, RateSource, Rates};
use sqm_netlink::{
    Error, Filter, Link, LinkSpec, Netlink, OperState, Qdisc, Result, TcHandle,
    tc::{
        cake::{CAKE_KIND, QdiscCakeRequest},
        filter::{U32_KIND, U32RedirectFilterRequest},
        handle::QdiscRequestInner,
        ingress::QdiscIngressRequest,
    },
};

/// A mutating operation, as seen by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddLink(LinkSpec),
    DeleteLink(u32),
    SetLinkUp(u32),
    ReplaceCake(QdiscCakeRequest),
    AddIngressQdisc(QdiscIngressRequest),
    DeleteQdisc(QdiscRequestInner),
    AddRedirectFilter(U32RedirectFilterRequest),
}

/// How the kernel answers an ingress qdisc creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IngressCreate {
    /// Create it, or fail with `EEXIST` if one is already there.
    #[default]
    Normal,
    /// Another agent gets there first: this qdisc appears and the request fails with `EEXIST`.
    Raced(Qdisc),
    /// Fail with `EEXIST` without anything ever being listed.
    Phantom,
}

#[derive(Debug, Default)]
struct Kernel {
    links: Vec<Link>,
    qdiscs: Vec<Qdisc>,
    filters: Vec<Filter>,
    next_index: u32,
    calls: Vec<Call>,
    reject_cake: bool,
    ingress_create: IngressCreate,
}

fn errno(code: i32) -> Error {
    Error::Io(io::Error::from_raw_os_error(code))
}

#[derive(Debug)]
pub struct MockNetlink {
    kernel: Mutex<Kernel>,
}

impl MockNetlink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { kernel: Mutex::new(Kernel { next_index: 100, ..Default::default() }) })
    }

    /// Add a pre-existing interface.
    pub fn add_physical(&self, name: &str, index: u32, mtu: u32) {
        self.kernel.lock().links.push(Link {
            name: name.to_string(),
            index,
            mtu,
            oper_state: OperState::Up,
        });
    }

    /// Add a qdisc behind the engine's back.
    pub fn add_qdisc(&self, qdisc: Qdisc) {
        self.kernel.lock().qdiscs.push(qdisc);
    }

    /// Add a filter behind the engine's back.
    pub fn add_filter(&self, filter: Filter) {
        self.kernel.lock().filters.push(filter);
    }

    /// Drop every qdisc on an interface behind the engine's back.
    pub fn flush_qdiscs(&self, interface_index: i32) {
        self.kernel.lock().qdiscs.retain(|q| q.interface_index != interface_index);
    }

    /// Make every CAKE replace fail with `EINVAL`.
    pub fn reject_cake(&self, reject: bool) {
        self.kernel.lock().reject_cake = reject;
    }

    /// Change how ingress qdisc creation is answered.
    pub fn ingress_create(&self, behaviour: IngressCreate) {
        self.kernel.lock().ingress_create = behaviour;
    }

    pub fn link(&self, name: &str) -> Option<Link> {
        self.kernel.lock().links.iter().find(|l| l.name == name).cloned()
    }

    pub fn qdiscs_on(&self, interface_index: i32) -> Vec<Qdisc> {
        let kernel = self.kernel.lock();
        kernel.qdiscs.iter().filter(|q| q.interface_index == interface_index).cloned().collect()
    }

    pub fn filters_on(&self, interface_index: i32) -> Vec<Filter> {
        let kernel = self.kernel.lock();
        kernel.filters.iter().filter(|f| f.interface_index == interface_index).cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.kernel.lock().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.kernel.lock().calls.iter().filter(|c| matches(c)).count()
    }

    pub fn clear_calls(&self) {
        self.kernel.lock().calls.clear();
    }
}

#[async_trait]
impl Netlink for MockNetlink {
    async fn link_by_name(&self, name: &str) -> Result<Link> {
        self.link(name).ok_or_else(|| Error::DeviceNotFound(name.to_string()))
    }

    async fn add_link(&self, spec: &LinkSpec) -> Result<()> {
        let mut kernel = self.kernel.lock();
        kernel.calls.push(Call::AddLink(spec.clone()));
        if kernel.links.iter().any(|l| l.name == spec.name) {
            return Err(errno(linux::EEXIST));
        }

        let index = kernel.next_index;
        kernel.next_index += 1;
        // New ifb devices start administratively down.
        kernel.links.push(Link {
            name: spec.name.clone(),
            index,
            mtu: spec.mtu,
            oper_state: OperState::Down,
        });

        Ok(())
    }

    async fn delete_link(&self, index: u32) -> Result<()> {
        let mut kernel = self.kernel.lock();
        kernel.calls.push(Call::DeleteLink(index));

        let before = kernel.links.len();
        kernel.links.retain(|l| l.index != index);
        if kernel.links.len() == before {
            return Err(errno(linux::ENODEV));
        }
        kernel.qdiscs.retain(|q| q.interface_index != index as i32);
        kernel.filters.retain(|f| f.interface_index != index as i32);

        Ok(())
    }

    async fn set_link_up(&self, index: u32) -> Result<()> {
        let mut kernel = self.kernel.lock();
        kernel.calls.push(Call::SetLinkUp(index));

        let link = kernel
            .links
            .iter_mut()
            .find(|l| l.index == index)
            .ok_or_else(|| errno(linux::ENODEV))?;
        link.oper_state = OperState::Unknown;

        Ok(())
    }

    async fn replace_cake(&self, request: QdiscCakeRequest) -> Result<()> {
        let mut kernel = self.kernel.lock();
        kernel.calls.push(Call::ReplaceCake(request));
        if kernel.reject_cake {
            return Err(errno(linux::EINVAL));
        }

        let inner = request.inner;
        kernel
            .qdiscs
            .retain(|q| !(q.interface_index == inner.interface_index && q.parent == inner.parent));
        kernel.qdiscs.push(Qdisc {
            interface_index: inner.interface_index,
            handle: inner.handle,
            parent: inner.parent,
            kind: CAKE_KIND.to_string(),
        });

        Ok(())
    }

    async fn qdiscs(&self, interface_index: i32) -> Result<Vec<Qdisc>> {
        Ok(self.qdiscs_on(interface_index))
    }

    async fn add_ingress_qdisc(&self, request: QdiscIngressRequest) -> Result<()> {
        let mut kernel = self.kernel.lock();
        kernel.calls.push(Call::AddIngressQdisc(request));

        match kernel.ingress_create.clone() {
            IngressCreate::Normal => {}
            IngressCreate::Raced(qdisc) => {
                kernel.qdiscs.push(qdisc);
                return Err(errno(linux::EEXIST));
            }
            IngressCreate::Phantom => return Err(errno(linux::EEXIST)),
        }

        let inner = request.inner;
        if kernel
            .qdiscs
            .iter()
            .any(|q| q.interface_index == inner.interface_index && q.parent == TcHandle::INGRESS)
        {
            return Err(errno(linux::EEXIST));
        }
        kernel.qdiscs.push(Qdisc {
            interface_index: inner.interface_index,
            handle: inner.handle,
            parent: inner.parent,
            kind: "ingress".to_string(),
        });

        Ok(())
    }

    async fn delete_qdisc(&self, inner: QdiscRequestInner) -> Result<()> {
        let mut kernel = self.kernel.lock();
        kernel.calls.push(Call::DeleteQdisc(inner));

        let before = kernel.qdiscs.len();
        kernel
            .qdiscs
            .retain(|q| !(q.interface_index == inner.interface_index && q.handle == inner.handle));
        if kernel.qdiscs.len() == before {
            return Err(errno(linux::ENOENT));
        }
        kernel
            .filters
            .retain(|f| !(f.interface_index == inner.interface_index && f.parent == inner.handle));

        Ok(())
    }

    async fn filters(&self, inner: QdiscRequestInner) -> Result<Vec<Filter>> {
        let kernel = self.kernel.lock();
        Ok(kernel
            .filters
            .iter()
            .filter(|f| f.interface_index == inner.interface_index && f.parent == inner.parent)
            .cloned()
            .collect())
    }

    async fn add_redirect_filter(&self, request: U32RedirectFilterRequest) -> Result<()> {
        let mut kernel = self.kernel.lock();
        kernel.calls.push(Call::AddRedirectFilter(request));

        let inner = request.inner;
        if !kernel
            .qdiscs
            .iter()
            .any(|q| q.interface_index == inner.interface_index && q.handle == inner.parent)
        {
            return Err(errno(linux::EINVAL));
        }
        kernel.filters.push(Filter {
            interface_index: inner.interface_index,
            parent: inner.parent,
            kind: U32_KIND.to_string(),
            priority: request.priority,
        });

        Ok(())
    }
}

/// Linux errno values.
mod linux {
    pub const ENOENT: i32 = 2;
    pub const EEXIST: i32 = 17;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
}

/// A rate source whose answer is set by the test.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRates {
    rates: Arc<Mutex<Option<Rates>>>,
    queries: Arc<Mutex<usize>>,
}

impl ScriptedRates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer subsequent queries with these rates.
    pub fn set(&self, ingress: i64, egress: i64) {
        *self.rates.lock() = Some(Rates { ingress, egress });
    }

    /// Fail subsequent queries.
    pub fn fail(&self) {
        *self.rates.lock() = None;
    }

    pub fn queries(&self) -> usize {
        *self.queries.lock()
    }
}

#[async_trait]
impl RateSource for ScriptedRates {
    async fn query(&self) -> std::result::Result<Rates, QueryError> {
        *self.queries.lock() += 1;
        let rates = *self.rates.lock();
        rates.ok_or_else(|| QueryError::Get {
            oid: "1.3.6.1.2.1".parse::<Oid>().expect("valid oid"),
            reason: "Receive(timeout)".to_string(),
        })
    }
}
