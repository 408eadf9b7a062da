//! Unsolicited router advertisement emission on the access links.
//!
//! Once a mobile node is registered, the MAG impersonates its home network:
//! it periodically advertises the node's delegated prefixes on the access
//! link, addressed to the node's link-local address, so the node configures
//! the same addresses it had on every previous link. One emitter task runs
//! per (access link, mobile node) pair; stopping it sends a final
//! advertisement with a zero router lifetime so the node drops the default
//! route without waiting for a timeout.

use std::future::Future;
use std::io;
use std::net::Ipv6Addr;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::mac::MacAddress;
use crate::nai::MobileNodeId;
use crate::prefix::Ipv6Prefix;
use crate::AccessLink;

/// ICMPv6 message type of a router advertisement.
const ND_ROUTER_ADVERT: u8 = 134;

/// Option type of the source link-layer address option.
const OPT_SOURCE_LINK_LAYER: u8 = 1;
/// Option type of the prefix information option.
const OPT_PREFIX_INFO: u8 = 3;
/// Option type of the MTU option.
const OPT_MTU: u8 = 5;

/// On-link flag of a prefix information option.
const PREFIX_FLAG_ON_LINK: u8 = 0x80;
/// Autonomous address configuration flag of a prefix information option.
const PREFIX_FLAG_AUTONOMOUS: u8 = 0x40;

/// Valid lifetime advertised for every delegated prefix, in seconds.
const PREFIX_VALID_LIFETIME: u32 = 7_200;
/// Preferred lifetime advertised for every delegated prefix, in seconds.
const PREFIX_PREFERRED_LIFETIME: u32 = 1_800;

/// Hop limit advertised to attached nodes.
const ADVERTISED_HOP_LIMIT: u8 = 64;

/// Router lifetime advertised while the binding is alive.
const ROUTER_LIFETIME: u16 = u16::MAX;

/// Default lower bound of the advertisement interval.
pub const MIN_RTR_ADV_INTERVAL: Duration = Duration::from_secs(3);
/// Default upper bound of the advertisement interval.
pub const MAX_RTR_ADV_INTERVAL: Duration = Duration::from_secs(4);

/// Where advertisements go. The production implementation is a raw ICMPv6
/// socket; tests collect the payloads on a channel.
pub trait RaOutput: Clone + Send + Sync + 'static {
    /// Send a router advertisement payload out of the given link, to the
    /// given link-local destination.
    fn send_ra(
        &self,
        link: u32,
        dst: Ipv6Addr,
        payload: Bytes,
    ) -> impl Future<Output = io::Result<()>> + Send;
}

/// Encode a router advertisement announcing the given prefixes.
///
/// The ICMPv6 checksum is left zero; the raw socket path computes it in the
/// kernel.
pub fn encode_router_advertisement(
    mac: MacAddress,
    mtu: u32,
    prefixes: &[Ipv6Prefix],
    router_lifetime: u16,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + 8 + 8 + prefixes.len() * 32);

    buf.put_u8(ND_ROUTER_ADVERT);
    buf.put_u8(0);
    // Checksum, owned by the kernel.
    buf.put_u16(0);
    buf.put_u8(ADVERTISED_HOP_LIMIT);
    // No managed or other-config flags: addresses come from the prefixes.
    buf.put_u8(0);
    buf.put_u16(router_lifetime);
    // Reachable time and retransmission timer are unspecified.
    buf.put_u32(0);
    buf.put_u32(0);

    buf.put_u8(OPT_SOURCE_LINK_LAYER);
    buf.put_u8(1);
    buf.put_slice(&mac.octets());

    buf.put_u8(OPT_MTU);
    buf.put_u8(1);
    buf.put_u16(0);
    buf.put_u32(mtu);

    for prefix in prefixes {
        buf.put_u8(OPT_PREFIX_INFO);
        buf.put_u8(4);
        buf.put_u8(prefix.prefix_len());
        buf.put_u8(PREFIX_FLAG_ON_LINK | PREFIX_FLAG_AUTONOMOUS);
        buf.put_u32(PREFIX_VALID_LIFETIME);
        buf.put_u32(PREFIX_PREFERRED_LIFETIME);
        buf.put_u32(0);
        buf.put_slice(&prefix.network().octets());
    }

    buf.freeze()
}

/// Manages the advertisement emitter tasks of a MAG.
pub struct RouterAdvertiser<O> {
    out: O,
    min_interval: Duration,
    max_interval: Duration,
    emitters: HashMap<(u32, MobileNodeId), CancellationToken>,
}

impl<O: RaOutput> RouterAdvertiser<O> {
    /// Create a new `RouterAdvertiser` sending through the given output,
    /// with emission periods drawn uniformly from the given interval.
    pub fn new(out: O, min_interval: Duration, max_interval: Duration) -> Self {
        RouterAdvertiser {
            out,
            min_interval,
            max_interval,
            emitters: HashMap::new(),
        }
    }

    /// Start advertising the given prefixes to a mobile node. An existing
    /// emitter for the same (link, node) pair winds down first; the new
    /// emitter immediately advertises again, so the node keeps its router.
    pub fn start(
        &mut self,
        link: &AccessLink,
        mn_id: MobileNodeId,
        mn_ll_addr: MacAddress,
        prefixes: Vec<Ipv6Prefix>,
    ) {
        let token = CancellationToken::new();
        if let Some(old) = self
            .emitters
            .insert((link.index, mn_id.clone()), token.clone())
        {
            old.cancel();
        }

        let out = self.out.clone();
        let dst = mn_ll_addr.link_local_address();
        let link_index = link.index;
        let payload =
            encode_router_advertisement(link.mac, link.mtu, &prefixes, ROUTER_LIFETIME);
        let final_payload = encode_router_advertisement(link.mac, link.mtu, &prefixes, 0);
        let min_ms = self.min_interval.as_millis() as u64;
        let max_ms = self.max_interval.as_millis() as u64;

        debug!(%mn_id, link = link_index, "Starting router advertisement emitter");
        tokio::spawn(async move {
            loop {
                if let Err(e) = out.send_ra(link_index, dst, payload.clone()).await {
                    warn!(%mn_id, link = link_index, "Failed to send router advertisement: {e}");
                }

                let wait = {
                    let mut rng = rand::thread_rng();
                    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = token.cancelled() => {
                        // One last advertisement which revokes the default
                        // route immediately.
                        if let Err(e) = out.send_ra(link_index, dst, final_payload).await {
                            warn!(%mn_id, link = link_index, "Failed to send final router advertisement: {e}");
                        }
                        debug!(%mn_id, link = link_index, "Stopped router advertisement emitter");
                        return;
                    }
                }
            }
        });
    }

    /// Stop advertising to a mobile node on the given link. The emitter
    /// sends a final zero-lifetime advertisement before going away.
    pub fn stop(&mut self, link: u32, mn_id: &MobileNodeId) {
        if let Some(token) = self.emitters.remove(&(link, mn_id.clone())) {
            token.cancel();
        }
    }
}

impl<O> Drop for RouterAdvertiser<O> {
    fn drop(&mut self) {
        for token in self.emitters.values() {
            token.cancel();
        }
    }
}

/// Raw ICMPv6 socket output for production MAGs.
#[cfg(target_os = "linux")]
pub use self::icmp::IcmpRaSocket;

#[cfg(target_os = "linux")]
mod icmp {
    use std::io;
    use std::net::Ipv6Addr;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::sync::Arc;

    use bytes::Bytes;

    use super::RaOutput;

    /// Neighbor discovery messages must carry the maximum hop limit or be
    /// dropped by receivers.
    const ND_HOP_LIMIT: libc::c_int = 255;

    /// A raw ICMPv6 socket. The kernel computes the ICMPv6 checksum of
    /// everything sent on it.
    #[derive(Clone)]
    pub struct IcmpRaSocket {
        fd: Arc<OwnedFd>,
    }

    impl IcmpRaSocket {
        /// Open the socket. Requires CAP_NET_RAW.
        pub fn new() -> io::Result<Self> {
            let fd = unsafe {
                libc::socket(
                    libc::AF_INET6,
                    libc::SOCK_RAW,
                    libc::IPPROTO_ICMPV6 as libc::c_int,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };

            let hops = ND_HOP_LIMIT;
            if unsafe {
                libc::setsockopt(
                    fd.as_raw_fd(),
                    libc::IPPROTO_IPV6,
                    libc::IPV6_UNICAST_HOPS,
                    &hops as *const libc::c_int as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            } < 0
            {
                return Err(io::Error::last_os_error());
            }

            Ok(IcmpRaSocket { fd: Arc::new(fd) })
        }
    }

    impl RaOutput for IcmpRaSocket {
        async fn send_ra(&self, link: u32, dst: Ipv6Addr, payload: Bytes) -> io::Result<()> {
            let addr = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: 0,
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr {
                    s6_addr: dst.octets(),
                },
                // Link-local destinations need the link spelled out.
                sin6_scope_id: link,
            };

            let sent = unsafe {
                libc::sendto(
                    self.fd.as_raw_fd(),
                    payload.as_ptr() as *const libc::c_void,
                    payload.len(),
                    0,
                    &addr as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            };
            if sent < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(())
        }
    }
}
