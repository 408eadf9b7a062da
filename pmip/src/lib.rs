//! Proxy Mobile IPv6 mobility core.
//!
//! This crate implements the control plane of
//! [RFC 5213](https://datatracker.ietf.org/doc/html/rfc5213): local
//! mobility anchors ([`Lma`]) owning the binding cache and mobile access
//! gateways ([`Mag`]) registering attached terminals on their behalf, plus
//! the forwarding plumbing both need — IPv6-in-IPv6 tunnels, per-node
//! routes and router advertisement emission. Mobile nodes themselves never
//! participate in signaling; the network tracks them through link-layer
//! attachment events.
//!
//! Everything kernel-specific sits behind the
//! [`ForwardingPlane`](tunnel_router::ForwardingPlane) and
//! [`RaOutput`](router_advertiser::RaOutput) traits, so the whole control
//! plane runs and tests on any host.

use serde::Deserialize;

use crate::mac::MacAddress;
use crate::mproto::AccessTechnology;

pub use crate::lma::{Lma, LmaConfig};
pub use crate::mag::{Mag, MagConfig};

pub mod agent;
pub mod binding_cache;
pub mod binding_update_list;
pub mod driver;
pub mod mac;
pub mod metrics;
pub mod mproto;
pub mod nai;
pub mod node_db;
pub mod prefix;
pub mod router_advertiser;
pub mod sequence_number;
pub mod timer;
pub mod tunnel_router;

mod lma;
mod mag;
#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

/// Default UDP port of the mobility endpoint.
///
/// Native mobility header transport has no port; this is the port used by
/// the UDP encapsulation both node types speak.
pub const DEFAULT_MH_PORT: u16 = 5436;

/// An access link a gateway serves: the downlink interface terminals attach
/// on.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AccessLink {
    /// Kernel interface index of the link.
    pub index: u32,
    /// MTU advertised to attached terminals.
    pub mtu: u32,
    /// The gateway's own link-layer address on this link.
    pub mac: MacAddress,
    /// Technology code reported in registrations for this link.
    #[serde(default = "default_att")]
    pub att: AccessTechnology,
}

fn default_att() -> AccessTechnology {
    AccessTechnology::Ieee80211
}
