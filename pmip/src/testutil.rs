//! Test fixtures for exercising the control plane without a kernel: a
//! forwarding plane which only keeps a journal, and a router advertisement
//! output which collects payloads on a channel.
//!
//! Compiled for this crate's own tests and, behind the `test-util` feature,
//! for external test code such as the integration suite.

use std::io;
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::prefix::Ipv6Prefix;
use crate::router_advertiser::RaOutput;
use crate::tunnel_router::{ForwardingPlane, TunnelParams};

/// The operations a test records, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    TunnelAdd(String),
    TunnelDel(String),
    LinkSetUp(u32, bool),
    RouteAdd(Ipv6Prefix, u32),
    RouteDel(Ipv6Prefix, u32),
}

/// A forwarding plane which performs nothing and records everything.
/// Individual operations can be made to fail to drive the error paths.
#[derive(Clone, Default)]
pub struct RecordingPlane {
    ops: Arc<Mutex<Vec<Op>>>,
    /// Device names reported as leftovers at startup.
    stale: Vec<String>,
    next_device: Arc<Mutex<u32>>,
    fail_tunnel_add: Arc<Mutex<bool>>,
    fail_route_add_to: Arc<Mutex<Option<u32>>>,
}

impl RecordingPlane {
    /// A plane which reports the given device names as leftovers at
    /// startup.
    pub fn with_stale(stale: Vec<String>) -> Self {
        RecordingPlane {
            stale,
            ..Default::default()
        }
    }

    /// Make every subsequent tunnel creation fail.
    pub fn fail_tunnel_adds(&self) {
        *self.fail_tunnel_add.lock().unwrap() = true;
    }

    /// Make every subsequent route installation through the given device
    /// fail.
    pub fn fail_route_adds_to(&self, device: u32) {
        *self.fail_route_add_to.lock().unwrap() = Some(device);
    }

    pub fn journal(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    /// Wait until the journal satisfies a predicate, within two seconds.
    pub async fn wait_for(&self, pred: impl Fn(&[Op]) -> bool) -> Vec<Op> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let journal = self.journal();
                if pred(&journal) {
                    return journal;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition was not reached in time")
    }
}

impl ForwardingPlane for RecordingPlane {
    async fn tunnel_add(&mut self, params: &TunnelParams) -> io::Result<u32> {
        if *self.fail_tunnel_add.lock().unwrap() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "injected tunnel failure",
            ));
        }
        self.ops
            .lock()
            .unwrap()
            .push(Op::TunnelAdd(params.name.clone()));
        let mut next = self.next_device.lock().unwrap();
        *next += 1;
        Ok(100 + *next)
    }

    async fn tunnel_del(&mut self, name: &str) -> io::Result<()> {
        self.ops.lock().unwrap().push(Op::TunnelDel(name.to_string()));
        Ok(())
    }

    async fn link_set_up(&mut self, device: u32, up: bool) -> io::Result<()> {
        self.ops.lock().unwrap().push(Op::LinkSetUp(device, up));
        Ok(())
    }

    async fn route_add(&mut self, prefix: Ipv6Prefix, device: u32) -> io::Result<()> {
        if *self.fail_route_add_to.lock().unwrap() == Some(device) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "injected route failure",
            ));
        }
        self.ops.lock().unwrap().push(Op::RouteAdd(prefix, device));
        Ok(())
    }

    async fn route_del(&mut self, prefix: Ipv6Prefix, device: u32) -> io::Result<()> {
        self.ops.lock().unwrap().push(Op::RouteDel(prefix, device));
        Ok(())
    }

    async fn stale_tunnels(&mut self, _name_prefix: &str) -> io::Result<Vec<String>> {
        Ok(self.stale.clone())
    }
}

/// A router advertisement output which collects sends on a channel.
#[derive(Clone)]
pub struct ChannelRaOutput {
    tx: mpsc::UnboundedSender<(u32, Ipv6Addr, Bytes)>,
}

impl ChannelRaOutput {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(u32, Ipv6Addr, Bytes)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelRaOutput { tx }, rx)
    }
}

impl RaOutput for ChannelRaOutput {
    async fn send_ra(&self, link: u32, dst: Ipv6Addr, payload: Bytes) -> io::Result<()> {
        self.tx
            .send((link, dst, payload))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver gone"))
    }
}
