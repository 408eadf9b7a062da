//! The mobile access gateway node.
//!
//! `Mag` wires the pieces of the access side together: the mobility agent
//! endpoint, the binding update list, the tunnel router and the router
//! advertiser. One task is the MAG strand: it serializes driver events,
//! inbound acknowledgements and timer firings, so all binding state is
//! mutated without locks.

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
use crate::binding_update_list::BindingUpdateList;
use crate::driver::{AttachmentEvent, DriverHandle};
use crate::metrics::Metrics;
use crate::mproto::Message;
use crate::node_db::NodeDb;
use crate::router_advertiser::{RaOutput, RouterAdvertiser, MAX_RTR_ADV_INTERVAL, MIN_RTR_ADV_INTERVAL};
use crate::timer::Timers;
use crate::tunnel_router::{ForwardingPlane, TunnelRouter};
use crate::AccessLink;

/// Configuration of a [`Mag`].
pub struct MagConfig {
    /// Identifier of this gateway, for diagnostics.
    pub node_id: String,
    /// The gateway's transport address, used as the local tunnel endpoint.
    pub address: Ipv6Addr,
    /// The access links this gateway serves.
    pub links: Vec<AccessLink>,
    /// Binding lifetime requested in registrations.
    pub lifetime: Duration,
    /// Lower bound of the router advertisement interval.
    pub min_ra_interval: Duration,
    /// Upper bound of the router advertisement interval.
    pub max_ra_interval: Duration,
}

impl MagConfig {
    /// A configuration with the default lifetimes and advertisement
    /// intervals.
    pub fn new(node_id: impl Into<String>, address: Ipv6Addr, links: Vec<AccessLink>) -> Self {
        MagConfig {
            node_id: node_id.into(),
            address,
            links,
            lifetime: Duration::from_secs(3600),
            min_ra_interval: MIN_RTR_ADV_INTERVAL,
            max_ra_interval: MAX_RTR_ADV_INTERVAL,
        }
    }
}

/// A running mobile access gateway.
pub struct Mag {
    driver_tx: mpsc::UnboundedSender<AttachmentEvent>,
    agent: MobilityAgent,
    cancel: CancellationToken,
}

impl Mag {
    /// Start a gateway on an already bound mobility socket and spawn its
    /// strand.
    pub fn new<P, O, M>(
        config: MagConfig,
        node_db: Arc<NodeDb>,
        socket: UdpSocket,
        plane: P,
        ra_out: O,
        metrics: M,
    ) -> io::Result<Mag>
    where
        P: ForwardingPlane,
        O: RaOutput,
        M: Metrics + Clone + Send + Sync + 'static,
    {
        let tunnels = TunnelRouter::spawn(plane);

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let agent = MobilityAgent::new(socket, inbound_tx, metrics.clone())?;

        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
        let (driver_tx, mut driver_rx) = mpsc::unbounded_channel();

        let advertiser =
            RouterAdvertiser::new(ra_out, config.min_ra_interval, config.max_ra_interval);
        let mut bindings = BindingUpdateList::new(
            node_db,
            tunnels,
            advertiser,
            agent.sender(),
            Timers::new(timer_tx),
            config.address,
            config.links,
            config.lifetime,
            metrics,
        );

        info!(
            node_id = %config.node_id,
            address = %config.address,
            "Mobile access gateway starting"
        );

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    select! {
                        _ = cancel.cancelled() => break,

                        event = driver_rx.recv() => {
                            match event {
                                Some(AttachmentEvent::Attach { ll_addr, link }) => {
                                    bindings.attach(ll_addr, link)
                                }
                                Some(AttachmentEvent::Detach { ll_addr, link }) => {
                                    bindings.detach(ll_addr, link)
                                }
                                None => break,
                            }
                        }

                        inbound = inbound_rx.recv() => {
                            match inbound {
                                Some(inbound) => match inbound.message {
                                    Message::Pba(pba) => bindings.on_pba(inbound.src, pba).await,
                                    Message::Pbu(_) => {
                                        debug!("Gateways don't serve binding updates, dropping")
                                    }
                                },
                                None => break,
                            }
                        }

                        timer = timer_rx.recv() => {
                            match timer {
                                Some(event) => bindings.on_timer(event).await,
                                None => break,
                            }
                        }
                    }
                }
                info!("Mobile access gateway strand finished");
            });
        }

        Ok(Mag {
            driver_tx,
            agent,
            cancel,
        })
    }

    /// The handle access drivers deliver their events through.
    pub fn driver_handle(&self) -> DriverHandle {
        DriverHandle::new(self.driver_tx.clone())
    }

    /// The local transport address of the mobility endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.agent.local_addr()
    }

    /// Amount of inbound datagrams dropped as malformed.
    pub fn malformed_count(&self) -> u64 {
        self.agent.malformed_count()
    }

    /// Stop the strand. In-flight registrations are abandoned; the kernel
    /// state is swept at the next startup.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Mag {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
