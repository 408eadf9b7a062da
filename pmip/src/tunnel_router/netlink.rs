//! Linux implementation of the forwarding plane.
//!
//! Routes and link state go through rtnetlink; the serialized request
//! dialogue the registry task requires falls out of awaiting every execute
//! before issuing the next one. Tunnel devices are managed through the
//! ip6_tnl ioctl family, which predates the netlink tunnel interface and is
//! what the kernel module always supports.

use std::io;
use std::net::{IpAddr, Ipv6Addr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use futures::TryStreamExt;
use netlink_packet_route::link::nlas::Nla;
use rtnetlink::{Handle, IpVersion};
use tracing::debug;

use super::{ForwardingPlane, TunnelParams};
use crate::prefix::Ipv6Prefix;

/// ioctl opcode creating an ip6_tnl device.
const SIOCADDTUNNEL: u64 = 0x89F1;
/// ioctl opcode removing an ip6_tnl device.
const SIOCDELTUNNEL: u64 = 0x89F2;

/// The always-present base device the tunnel ioctls are addressed to when
/// creating new devices.
const IP6_TNL_BASE_DEVICE: &str = "ip6tnl0";

/// Tunnel ioctl parameter block, mirroring the kernel's `ip6_tnl_parm`.
#[repr(C)]
struct Ip6TnlParm {
    name: [libc::c_char; libc::IFNAMSIZ],
    link: libc::c_int,
    proto: u8,
    encap_limit: u8,
    hop_limit: u8,
    flowinfo: u32,
    flags: u32,
    laddr: libc::in6_addr,
    raddr: libc::in6_addr,
}

/// The ifreq layout used by the tunnel ioctls: a device name plus a pointer
/// to the parameter block.
#[repr(C)]
struct IfReqTunnel {
    name: [libc::c_char; libc::IFNAMSIZ],
    data: *mut libc::c_void,
}

/// The kernel forwarding plane of a production node.
pub struct NetlinkPlane {
    handle: Handle,
    /// Plain AF_INET6 socket the tunnel ioctls are issued on.
    ctl: OwnedFd,
}

impl NetlinkPlane {
    /// Open the netlink connection and the ioctl control socket.
    ///
    /// # Panics
    ///
    /// This function will panic if called outside of the context of a tokio
    /// runtime.
    pub fn new() -> io::Result<Self> {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);

        let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(NetlinkPlane {
            handle,
            ctl: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    async fn link_index(&self, name: &str) -> io::Result<u32> {
        self.handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute()
            .try_next()
            .await
            .map_err(other)?
            .map(|link| link.header.index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "link not found"))
    }

    /// Issue the creation ioctl. Kept synchronous so the raw pointers in
    /// the ifreq never live across an await point.
    fn ioctl_add(&self, params: &TunnelParams) -> io::Result<()> {
        let mut parm = Ip6TnlParm {
            name: ifname(&params.name)?,
            link: 0,
            proto: libc::IPPROTO_IPV6 as u8,
            encap_limit: params.encap_limit,
            hop_limit: params.hop_limit,
            flowinfo: 0,
            flags: params.flags,
            laddr: in6(params.local),
            raddr: in6(params.remote),
        };
        let mut ifr = IfReqTunnel {
            name: ifname(IP6_TNL_BASE_DEVICE)?,
            data: &mut parm as *mut Ip6TnlParm as *mut libc::c_void,
        };

        if unsafe {
            libc::ioctl(
                self.ctl.as_raw_fd(),
                SIOCADDTUNNEL as libc::c_ulong,
                &mut ifr,
            )
        } < 0
        {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

/// Convert an interface name to its fixed size ioctl representation.
fn ifname(name: &str) -> io::Result<[libc::c_char; libc::IFNAMSIZ]> {
    if name.len() >= libc::IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "interface name too long",
        ));
    }
    let mut buf = [0 as libc::c_char; libc::IFNAMSIZ];
    for (dst, src) in buf.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    Ok(buf)
}

fn in6(addr: Ipv6Addr) -> libc::in6_addr {
    libc::in6_addr {
        s6_addr: addr.octets(),
    }
}

fn other(e: rtnetlink::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl ForwardingPlane for NetlinkPlane {
    async fn tunnel_add(&mut self, params: &TunnelParams) -> io::Result<u32> {
        self.ioctl_add(params)?;
        debug!(name = %params.name, "Created ip6_tnl device");

        self.link_index(&params.name).await
    }

    async fn tunnel_del(&mut self, name: &str) -> io::Result<()> {
        let mut parm = Ip6TnlParm {
            name: ifname(name)?,
            link: 0,
            proto: 0,
            encap_limit: 0,
            hop_limit: 0,
            flowinfo: 0,
            flags: 0,
            laddr: in6(Ipv6Addr::UNSPECIFIED),
            raddr: in6(Ipv6Addr::UNSPECIFIED),
        };
        let mut ifr = IfReqTunnel {
            name: ifname(name)?,
            data: &mut parm as *mut Ip6TnlParm as *mut libc::c_void,
        };

        if unsafe {
            libc::ioctl(
                self.ctl.as_raw_fd(),
                SIOCDELTUNNEL as libc::c_ulong,
                &mut ifr,
            )
        } < 0
        {
            return Err(io::Error::last_os_error());
        }
        debug!(name, "Removed ip6_tnl device");

        Ok(())
    }

    async fn link_set_up(&mut self, device: u32, up: bool) -> io::Result<()> {
        let request = self.handle.link().set(device);
        let request = if up { request.up() } else { request.down() };
        request.execute().await.map_err(other)
    }

    async fn route_add(&mut self, prefix: Ipv6Prefix, device: u32) -> io::Result<()> {
        // The builder defaults match what mobility routes need: table main,
        // protocol static, scope universe, type unicast.
        self.handle
            .route()
            .add()
            .v6()
            .destination_prefix(prefix.network(), prefix.prefix_len())
            .output_interface(device)
            .execute()
            .await
            .map_err(other)
    }

    async fn route_del(&mut self, prefix: Ipv6Prefix, device: u32) -> io::Result<()> {
        let mut routes = self.handle.route().get(IpVersion::V6).execute();
        while let Some(route) = routes.try_next().await.map_err(other)? {
            if route.destination_prefix()
                == Some((IpAddr::V6(prefix.network()), prefix.prefix_len()))
                && route.output_interface() == Some(device)
            {
                return self.handle.route().del(route).execute().await.map_err(other);
            }
        }

        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "route not found in the main table",
        ))
    }

    async fn stale_tunnels(&mut self, name_prefix: &str) -> io::Result<Vec<String>> {
        let mut links = self.handle.link().get().execute();
        let mut names = Vec::new();
        while let Some(link) = links.try_next().await.map_err(other)? {
            for nla in &link.nlas {
                if let Nla::IfName(name) = nla {
                    if name.starts_with(name_prefix) {
                        names.push(name.clone());
                    }
                }
            }
        }

        Ok(names)
    }
}
