//! Refcounted tunnels and host routes over the kernel forwarding plane.
//!
//! Binding entries on both node types realize their forwarding state through
//! this module: an IPv6-in-IPv6 tunnel towards the peer and one route per
//! delegated prefix. Tunnels are shared — at most one exists per
//! (local, remote) address pair — and routes likewise per
//! (prefix, output device) pair, so everything is reference counted here
//! rather than owned by individual bindings.
//!
//! All kernel dialogue happens on one dedicated task, which serializes
//! netlink request/response pairs. The mobility strands talk to it through
//! [`TunnelRouter`], a cheap clonable client; a call blocks only for its own
//! request.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::Ipv6Addr;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::prefix::Ipv6Prefix;

#[cfg(target_os = "linux")]
pub use self::netlink::NetlinkPlane;

#[cfg(target_os = "linux")]
mod netlink;

/// Name prefix of tunnel devices owned by this daemon. Used both to derive
/// new device names and to recognize leftovers from a crashed run at
/// startup.
pub const TUNNEL_NAME_PREFIX: &str = "pmip";

/// Default encapsulation limit of created tunnels.
pub const TUNNEL_ENCAP_LIMIT: u8 = 4;
/// Default hop limit of created tunnels.
pub const TUNNEL_HOP_LIMIT: u8 = 64;

/// Parameters of a point-to-point IPv6-in-IPv6 tunnel device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelParams {
    /// Device name, at most 15 bytes.
    pub name: String,
    /// Local tunnel endpoint.
    pub local: Ipv6Addr,
    /// Remote tunnel endpoint.
    pub remote: Ipv6Addr,
    /// Encapsulation limit written into the tunnel encapsulation option.
    pub encap_limit: u8,
    /// Hop limit of the outer packets.
    pub hop_limit: u8,
    /// Tunnel flags. None are set for mobility tunnels.
    pub flags: u32,
}

/// The kernel surface the tunnel router drives. The linux implementation is
/// [`NetlinkPlane`]; tests substitute a recording fake.
pub trait ForwardingPlane: Send + 'static {
    /// Create a tunnel device and return its interface index.
    fn tunnel_add(
        &mut self,
        params: &TunnelParams,
    ) -> impl Future<Output = io::Result<u32>> + Send;

    /// Delete a tunnel device by name.
    fn tunnel_del(&mut self, name: &str) -> impl Future<Output = io::Result<()>> + Send;

    /// Bring a device up or down.
    fn link_set_up(&mut self, device: u32, up: bool)
        -> impl Future<Output = io::Result<()>> + Send;

    /// Install a route for `prefix` through `device` in the main table.
    fn route_add(
        &mut self,
        prefix: Ipv6Prefix,
        device: u32,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Remove the route for `prefix` through `device`.
    fn route_del(
        &mut self,
        prefix: Ipv6Prefix,
        device: u32,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Names of tunnel devices with the given name prefix left behind by a
    /// previous run.
    fn stale_tunnels(
        &mut self,
        name_prefix: &str,
    ) -> impl Future<Output = io::Result<Vec<String>>> + Send;
}

/// An error returned by [`TunnelRouter`] operations.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The kernel rejected or failed a forwarding operation.
    #[error("kernel forwarding operation failed: {0}")]
    Plane(#[from] io::Error),
    /// The tunnel router task is gone; the node is shutting down.
    #[error("tunnel router task is gone")]
    ChannelClosed,
    /// A release was requested for a tunnel this router doesn't know.
    #[error("release of an unknown tunnel")]
    UnknownTunnel,
    /// A release was requested for a route this router doesn't know.
    #[error("release of an unknown route")]
    UnknownRoute,
}

/// A share of a live tunnel device. Holders must give the handle back
/// through [`TunnelRouter::release_tunnel`]; the device disappears when the
/// last share is released.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelHandle {
    local: Ipv6Addr,
    remote: Ipv6Addr,
    device: u32,
}

impl TunnelHandle {
    /// Interface index of the tunnel device, usable as a route output
    /// device.
    pub fn device(&self) -> u32 {
        self.device
    }

    /// The remote endpoint this tunnel runs to.
    pub fn remote(&self) -> Ipv6Addr {
        self.remote
    }
}

enum Request {
    AcquireTunnel {
        local: Ipv6Addr,
        remote: Ipv6Addr,
        reply: oneshot::Sender<Result<TunnelHandle, TunnelError>>,
    },
    ReleaseTunnel {
        handle: TunnelHandle,
        reply: oneshot::Sender<Result<(), TunnelError>>,
    },
    AddRoute {
        prefix: Ipv6Prefix,
        device: u32,
        reply: oneshot::Sender<Result<(), TunnelError>>,
    },
    RemoveRoute {
        prefix: Ipv6Prefix,
        device: u32,
        reply: oneshot::Sender<Result<(), TunnelError>>,
    },
}

/// Client half of the tunnel router. Cloning is cheap; all clones talk to
/// the same registry task.
#[derive(Debug, Clone)]
pub struct TunnelRouter {
    tx: mpsc::Sender<Request>,
}

impl TunnelRouter {
    /// Spawn the registry task on the given forwarding plane and return a
    /// client for it. Tunnel devices left behind by a previous run are swept
    /// before the first request is served.
    pub fn spawn<P: ForwardingPlane>(plane: P) -> Self {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(run(plane, rx));
        TunnelRouter { tx }
    }

    /// Get a share of the tunnel between the given endpoints, creating and
    /// bringing up the device if this is the first share.
    pub async fn acquire_tunnel(
        &self,
        local: Ipv6Addr,
        remote: Ipv6Addr,
    ) -> Result<TunnelHandle, TunnelError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::AcquireTunnel {
                local,
                remote,
                reply,
            })
            .await
            .map_err(|_| TunnelError::ChannelClosed)?;
        rx.await.map_err(|_| TunnelError::ChannelClosed)?
    }

    /// Give back a tunnel share. The device is brought down and deleted
    /// when the last share is released.
    pub async fn release_tunnel(&self, handle: TunnelHandle) -> Result<(), TunnelError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::ReleaseTunnel { handle, reply })
            .await
            .map_err(|_| TunnelError::ChannelClosed)?;
        rx.await.map_err(|_| TunnelError::ChannelClosed)?
    }

    /// Get a share of the route for `prefix` through `device`, installing it
    /// if this is the first share.
    pub async fn add_route(&self, prefix: Ipv6Prefix, device: u32) -> Result<(), TunnelError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::AddRoute {
                prefix,
                device,
                reply,
            })
            .await
            .map_err(|_| TunnelError::ChannelClosed)?;
        rx.await.map_err(|_| TunnelError::ChannelClosed)?
    }

    /// Give back a route share. The route is removed from the kernel when
    /// the last share is released.
    pub async fn remove_route(&self, prefix: Ipv6Prefix, device: u32) -> Result<(), TunnelError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::RemoveRoute {
                prefix,
                device,
                reply,
            })
            .await
            .map_err(|_| TunnelError::ChannelClosed)?;
        rx.await.map_err(|_| TunnelError::ChannelClosed)?
    }
}

/// Derive the deterministic device name for a tunnel to the given remote.
/// Purely diagnostic, but stable so stale devices can be recognized.
fn tunnel_name(remote: Ipv6Addr) -> String {
    let o = remote.octets();
    format!(
        "{}{:02x}{:02x}{:02x}{:02x}",
        TUNNEL_NAME_PREFIX, o[12], o[13], o[14], o[15]
    )
}

struct TunnelEntry {
    name: String,
    device: u32,
    refcount: usize,
}

async fn run<P: ForwardingPlane>(mut plane: P, mut rx: mpsc::Receiver<Request>) {
    // Reclaim nothing from a previous run; every device we find with our
    // name prefix is an orphan of a crash and goes away before the first
    // binding is served.
    match plane.stale_tunnels(TUNNEL_NAME_PREFIX).await {
        Ok(stale) => {
            for name in stale {
                match plane.tunnel_del(&name).await {
                    Ok(()) => info!(%name, "Removed stale tunnel device"),
                    Err(e) => warn!(%name, "Failed to remove stale tunnel device: {e}"),
                }
            }
        }
        Err(e) => warn!("Failed to enumerate stale tunnel devices: {e}"),
    }

    let mut tunnels: HashMap<(Ipv6Addr, Ipv6Addr), TunnelEntry> = HashMap::new();
    let mut routes: HashMap<(Ipv6Prefix, u32), usize> = HashMap::new();

    while let Some(request) = rx.recv().await {
        match request {
            Request::AcquireTunnel {
                local,
                remote,
                reply,
            } => {
                let _ = reply.send(acquire_tunnel(&mut plane, &mut tunnels, local, remote).await);
            }
            Request::ReleaseTunnel { handle, reply } => {
                let _ = reply.send(release_tunnel(&mut plane, &mut tunnels, handle).await);
            }
            Request::AddRoute {
                prefix,
                device,
                reply,
            } => {
                let result = match routes.entry((prefix, device)) {
                    Entry::Occupied(mut occupied) => {
                        *occupied.get_mut() += 1;
                        debug!(%prefix, device, refcount = *occupied.get(), "Sharing existing route");
                        Ok(())
                    }
                    Entry::Vacant(vacant) => match plane.route_add(prefix, device).await {
                        Ok(()) => {
                            debug!(%prefix, device, "Installed route");
                            vacant.insert(1);
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    },
                };
                let _ = reply.send(result);
            }
            Request::RemoveRoute {
                prefix,
                device,
                reply,
            } => {
                let result = match routes.entry((prefix, device)) {
                    Entry::Occupied(mut occupied) => {
                        if *occupied.get() > 1 {
                            *occupied.get_mut() -= 1;
                            Ok(())
                        } else {
                            occupied.remove();
                            match plane.route_del(prefix, device).await {
                                Ok(()) => {
                                    debug!(%prefix, device, "Removed route");
                                    Ok(())
                                }
                                Err(e) => Err(e.into()),
                            }
                        }
                    }
                    Entry::Vacant(_) => Err(TunnelError::UnknownRoute),
                };
                let _ = reply.send(result);
            }
        }
    }
}

async fn acquire_tunnel<P: ForwardingPlane>(
    plane: &mut P,
    tunnels: &mut HashMap<(Ipv6Addr, Ipv6Addr), TunnelEntry>,
    local: Ipv6Addr,
    remote: Ipv6Addr,
) -> Result<TunnelHandle, TunnelError> {
    if let Some(entry) = tunnels.get_mut(&(local, remote)) {
        entry.refcount += 1;
        debug!(
            name = %entry.name,
            refcount = entry.refcount,
            "Sharing existing tunnel"
        );
        return Ok(TunnelHandle {
            local,
            remote,
            device: entry.device,
        });
    }

    let params = TunnelParams {
        name: tunnel_name(remote),
        local,
        remote,
        encap_limit: TUNNEL_ENCAP_LIMIT,
        hop_limit: TUNNEL_HOP_LIMIT,
        flags: 0,
    };
    let device = plane.tunnel_add(&params).await?;
    if let Err(e) = plane.link_set_up(device, true).await {
        // Roll the half-created device back so a retry starts clean.
        if let Err(e) = plane.tunnel_del(&params.name).await {
            warn!(
                name = %params.name,
                "Failed to roll back tunnel after link up failure: {e}"
            );
        }
        return Err(e.into());
    }

    info!(name = %params.name, %local, %remote, "Created tunnel device");
    tunnels.insert(
        (local, remote),
        TunnelEntry {
            name: params.name,
            device,
            refcount: 1,
        },
    );

    Ok(TunnelHandle {
        local,
        remote,
        device,
    })
}

async fn release_tunnel<P: ForwardingPlane>(
    plane: &mut P,
    tunnels: &mut HashMap<(Ipv6Addr, Ipv6Addr), TunnelEntry>,
    handle: TunnelHandle,
) -> Result<(), TunnelError> {
    let Some(entry) = tunnels.get_mut(&(handle.local, handle.remote)) else {
        return Err(TunnelError::UnknownTunnel);
    };

    if entry.refcount > 1 {
        entry.refcount -= 1;
        return Ok(());
    }

    let entry = tunnels
        .remove(&(handle.local, handle.remote))
        .expect("Entry was just looked up under the same key; qed");
    if let Err(e) = plane.link_set_up(entry.device, false).await {
        warn!(name = %entry.name, "Failed to bring tunnel down: {e}");
    }
    plane.tunnel_del(&entry.name).await?;
    info!(name = %entry.name, "Deleted tunnel device");

    Ok(())
}
