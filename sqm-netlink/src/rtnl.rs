//! [`Netlink`] over a real rtnetlink socket.

use async_trait::async_trait;
use futures::{StreamExt as _, TryStreamExt as _};
use nix::libc::ENODEV;
use rtnetlink::LinkUnspec;
use rtnetlink::packet_core::{NetlinkMessage, NetlinkPayload};
use rtnetlink::packet_route::{
    RouteNetlinkMessage,
    tc::{TcAttribute, TcMessage},
};
use tokio::task::JoinHandle;

use crate::tc::{
    cake::QdiscCakeRequest,
    filter::U32RedirectFilterRequest,
    handle::{QdiscRequestInner, display_handle},
    ingress::{
        QdiscIngressRequest, delete_qdisc_request, dump_filters_request, dump_qdiscs_request,
    },
};
use crate::{Error, Filter, Link, LinkSpec, Netlink, Qdisc, Result};

/// Kernel access through rtnetlink.
///
/// Owns the background task driving the socket; dropping this value stops it.
#[derive(Debug)]
pub struct RtNetlink {
    /// Handle for sending rtnetlink messages.
    handle: rtnetlink::Handle,
    /// Background task processing rtnetlink responses.
    connection_task: JoinHandle<()>,
}

impl RtNetlink {
    /// Open an rtnetlink socket in the current network namespace.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect() -> Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        let connection_task = tokio::spawn(connection);

        Ok(Self { handle, connection_task })
    }

    /// Send a request that is answered with an ack, failing on the first error payload.
    async fn execute(&self, request: NetlinkMessage<RouteNetlinkMessage>) -> Result<()> {
        let mut handle = self.handle.clone();
        let mut res = handle.request(request)?;
        while let Some(msg) = res.next().await {
            if let NetlinkPayload::Error(e) = msg.payload
                && e.code.is_some()
            {
                tracing::debug!(?e, "request rejected");
                return Err(rtnetlink::Error::NetlinkError(e).into());
            }
        }

        Ok(())
    }

    /// Send a dump request and collect every traffic control message it yields.
    async fn dump(&self, request: NetlinkMessage<RouteNetlinkMessage>) -> Result<Vec<TcMessage>> {
        let mut handle = self.handle.clone();
        let mut res = handle.request(request)?;
        let mut messages = Vec::new();
        while let Some(msg) = res.next().await {
            match msg.payload {
                NetlinkPayload::InnerMessage(
                    RouteNetlinkMessage::NewQueueDiscipline(tc)
                    | RouteNetlinkMessage::NewTrafficFilter(tc),
                ) => messages.push(tc),
                NetlinkPayload::Error(e) if e.code.is_some() => {
                    tracing::debug!(?e, "dump rejected");
                    return Err(rtnetlink::Error::NetlinkError(e).into());
                }
                _ => {}
            }
        }

        Ok(messages)
    }
}

impl Drop for RtNetlink {
    fn drop(&mut self) {
        self.connection_task.abort();
    }
}

fn kind_of(message: &TcMessage) -> String {
    message
        .attributes
        .iter()
        .find_map(|attr| match attr {
            TcAttribute::Kind(kind) => Some(kind.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[async_trait]
impl Netlink for RtNetlink {
    async fn link_by_name(&self, name: &str) -> Result<Link> {
        let mut links = self.handle.link().get().match_name(name.to_string()).execute();

        match links.try_next().await {
            Ok(Some(message)) => Ok(Link::from(message)),
            Ok(None) => Err(Error::DeviceNotFound(name.to_string())),
            Err(e) => match Error::from(e) {
                e if e.is_errno(ENODEV) => Err(Error::DeviceNotFound(name.to_string())),
                e => Err(e),
            },
        }
    }

    async fn add_link(&self, spec: &LinkSpec) -> Result<()> {
        tracing::debug!(name = %spec.name, mtu = spec.mtu, kind = ?spec.kind, "adding link");
        self.handle.link().add(spec.to_message()).execute().await?;
        Ok(())
    }

    async fn delete_link(&self, index: u32) -> Result<()> {
        tracing::debug!(index, "deleting link");
        self.handle.link().del(index).execute().await?;
        Ok(())
    }

    async fn set_link_up(&self, index: u32) -> Result<()> {
        tracing::debug!(index, "setting link up");
        self.handle.link().set(LinkUnspec::new_with_index(index).up().build()).execute().await?;
        Ok(())
    }

    async fn replace_cake(&self, request: QdiscCakeRequest) -> Result<()> {
        tracing::debug!(
            index = request.inner.interface_index,
            handle = display_handle(request.inner.handle),
            base_rate = request.options.base_rate,
            "replacing cake qdisc"
        );
        self.execute(request.build()).await
    }

    async fn qdiscs(&self, interface_index: i32) -> Result<Vec<Qdisc>> {
        let qdiscs = self
            .dump(dump_qdiscs_request())
            .await?
            .into_iter()
            .filter(|message| message.header.index == interface_index)
            .map(|message| Qdisc {
                interface_index,
                handle: message.header.handle,
                parent: message.header.parent,
                kind: kind_of(&message),
            })
            .collect();

        Ok(qdiscs)
    }

    async fn add_ingress_qdisc(&self, request: QdiscIngressRequest) -> Result<()> {
        tracing::debug!(index = request.inner.interface_index, "adding ingress qdisc");
        self.execute(request.build()).await
    }

    async fn delete_qdisc(&self, inner: QdiscRequestInner) -> Result<()> {
        tracing::debug!(
            index = inner.interface_index,
            handle = display_handle(inner.handle),
            "deleting qdisc"
        );
        self.execute(delete_qdisc_request(inner)).await
    }

    async fn filters(&self, inner: QdiscRequestInner) -> Result<Vec<Filter>> {
        let filters = self
            .dump(dump_filters_request(inner))
            .await?
            .into_iter()
            .filter(|message| message.header.index == inner.interface_index)
            .map(|message| Filter {
                interface_index: inner.interface_index,
                parent: message.header.parent,
                kind: kind_of(&message),
                priority: (message.header.info >> 16) as u16,
            })
            .collect();

        Ok(filters)
    }

    async fn add_redirect_filter(&self, request: U32RedirectFilterRequest) -> Result<()> {
        tracing::debug!(
            index = request.inner.interface_index,
            target = request.target_index,
            priority = request.priority,
            "adding redirect filter"
        );
        self.execute(request.build()).await
    }
}
