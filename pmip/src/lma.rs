//! The local mobility anchor node.
//!
//! `Lma` wires the anchor side together: the mobility agent endpoint, the
//! binding cache and the tunnel router. One task is the LMA strand,
//! serializing inbound registrations and lifetime expiries.

use std::io;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::MobilityAgent;
use crate::binding_cache::BindingCache;
use crate::metrics::Metrics;
use crate::mproto::Message;
use crate::node_db::NodeDb;
use crate::timer::Timers;
use crate::tunnel_router::{ForwardingPlane, TunnelRouter};

/// Configuration of an [`Lma`].
pub struct LmaConfig {
    /// Identifier of this anchor, for diagnostics.
    pub node_id: String,
    /// The anchor's transport address, used as the local tunnel endpoint.
    pub address: Ipv6Addr,
    /// Upper bound on granted binding lifetimes.
    pub max_lifetime: Duration,
}

impl LmaConfig {
    /// A configuration with the default lifetime policy.
    pub fn new(node_id: impl Into<String>, address: Ipv6Addr) -> Self {
        LmaConfig {
            node_id: node_id.into(),
            address,
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

/// A running local mobility anchor.
pub struct Lma {
    agent: MobilityAgent,
    cancel: CancellationToken,
}

impl Lma {
    /// Start an anchor on an already bound mobility socket and spawn its
    /// strand.
    pub fn new<P, M>(
        config: LmaConfig,
        node_db: Arc<NodeDb>,
        socket: UdpSocket,
        plane: P,
        metrics: M,
    ) -> io::Result<Lma>
    where
        P: ForwardingPlane,
        M: Metrics + Clone + Send + Sync + 'static,
    {
        let tunnels = TunnelRouter::spawn(plane);

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let agent = MobilityAgent::new(socket, inbound_tx, metrics.clone())?;

        let (expiry_tx, mut expiry_rx) = mpsc::unbounded_channel();
        let mut bindings = BindingCache::new(
            node_db,
            tunnels,
            agent.sender(),
            Timers::new(expiry_tx),
            config.address,
            config.max_lifetime,
            metrics,
        );

        info!(
            node_id = %config.node_id,
            address = %config.address,
            "Local mobility anchor starting"
        );

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    select! {
                        _ = cancel.cancelled() => break,

                        inbound = inbound_rx.recv() => {
                            match inbound {
                                Some(inbound) => match inbound.message {
                                    Message::Pbu(pbu) => bindings.on_pbu(inbound.src, pbu).await,
                                    Message::Pba(_) => {
                                        debug!("Anchors don't expect acknowledgements, dropping")
                                    }
                                },
                                None => break,
                            }
                        }

                        expiry = expiry_rx.recv() => {
                            match expiry {
                                Some(event) => bindings.on_expiry(event).await,
                                None => break,
                            }
                        }
                    }
                }
                info!("Local mobility anchor strand finished");
            });
        }

        Ok(Lma { agent, cancel })
    }

    /// The local transport address of the mobility endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.agent.local_addr()
    }

    /// Amount of inbound datagrams dropped as malformed.
    pub fn malformed_count(&self) -> u64 {
        self.agent.malformed_count()
    }

    /// Stop the strand. Bindings are soft state and recover by
    /// re-registration; the kernel state is swept at the next startup.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Lma {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
