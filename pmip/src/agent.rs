//! The mobility protocol endpoint shared by both node types.
//!
//! The agent owns the datagram socket mobility header messages travel over
//! and runs one task on it: outbound messages are queued by the binding
//! state machines and sent fire-and-forget (retransmission belongs to the
//! machine which requested the send), inbound messages are decoded and
//! handed to the node strand. Messages which don't decode are counted and
//! dropped.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::udp::UdpFramed;
use tracing::{debug, error, info};

use crate::metrics::Metrics;
use crate::mproto::{Codec, Message};

/// A mobility message received from a peer, as delivered to the node
/// strand.
#[derive(Debug)]
pub struct InboundMessage {
    /// Transport address the message came from.
    pub src: SocketAddr,
    /// The decoded message.
    pub message: Message,
}

/// Handle to the protocol endpoint task.
#[derive(Debug, Clone)]
pub struct MobilityAgent {
    out: mpsc::UnboundedSender<(Message, SocketAddr)>,
    malformed: Arc<AtomicU64>,
    local: SocketAddr,
}

impl MobilityAgent {
    /// Bind a new endpoint on the given address and spawn its task.
    /// Received messages are delivered on `inbound`.
    pub async fn bind<M: Metrics + Send + 'static>(
        addr: SocketAddr,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        metrics: M,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        MobilityAgent::new(socket, inbound, metrics)
    }

    /// Spawn the endpoint task on an already bound socket.
    pub fn new<M: Metrics + Send + 'static>(
        socket: UdpSocket,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        metrics: M,
    ) -> io::Result<Self> {
        let local = socket.local_addr()?;
        let mut framed = UdpFramed::new(socket, Codec::new());
        let (out, mut out_rx) = mpsc::unbounded_channel::<(Message, SocketAddr)>();
        let malformed = Arc::new(AtomicU64::new(0));

        {
            let malformed = malformed.clone();
            tokio::spawn(async move {
                loop {
                    select! {
                        frame = framed.next() => {
                            match frame {
                                Some(Ok((message, src))) => {
                                    if inbound.send(InboundMessage { src, message }).is_err() {
                                        // The strand is gone, so is our job.
                                        break
                                    }
                                }
                                Some(Err(e)) => {
                                    malformed.fetch_add(1, Ordering::Relaxed);
                                    metrics.mh_malformed();
                                    debug!("Dropping malformed mobility message: {e}");
                                }
                                None => {
                                    info!("Mobility endpoint closed");
                                    break
                                }
                            }
                        }

                        outgoing = out_rx.recv() => {
                            match outgoing {
                                Some((message, dst)) => {
                                    if let Err(e) = framed.send((message, dst)).await {
                                        error!("Failed to send mobility message: {e}");
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                }
            });
        }

        Ok(MobilityAgent {
            out,
            malformed,
            local,
        })
    }

    /// A sender which queues messages for transmission. The binding state
    /// machines hold this rather than the agent itself.
    pub fn sender(&self) -> mpsc::UnboundedSender<(Message, SocketAddr)> {
        self.out.clone()
    }

    /// The local transport address of the endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Amount of inbound datagrams dropped because they did not parse as a
    /// mobility message.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}
