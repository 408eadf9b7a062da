//! The authoritative binding cache of a local mobility anchor.
//!
//! One entry per mobile node with an active mobility session, mutated only
//! on the LMA strand by the inbound PBU handler and the lifetime timers.
//! Every registered entry owns a share of the tunnel towards its serving
//! MAG and one route per delegated prefix through that tunnel; handoffs
//! reconfigure the forwarding install-before-remove so traffic is never
//! routeless.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::metrics::Metrics;
use crate::mproto::{BindingStatus, Message, ProxyBindingAck, ProxyBindingUpdate};
use crate::nai::MobileNodeId;
use crate::node_db::NodeDb;
use crate::prefix::Ipv6Prefix;
use crate::sequence_number::SeqNo;
use crate::timer::Timers;
use crate::tunnel_router::{TunnelHandle, TunnelRouter};

/// Lifecycle state of a binding cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// No active session. Entries in this state are not stored.
    Idle,
    /// The binding is active and forwarding is configured.
    Registered,
    /// The binding is being torn down.
    Deregistering,
}

/// A single mobility session at the anchor.
#[derive(Debug)]
pub struct BindingCacheEntry {
    /// Lifecycle state.
    pub state: BindingState,
    /// The proxy care-of address: transport address of the serving MAG.
    pub peer: SocketAddr,
    /// The prefixes delegated to the mobile node, per its policy.
    pub prefixes: Vec<Ipv6Prefix>,
    /// Granted lifetime of the current registration.
    pub lifetime: Duration,
    /// Last accepted sequence number.
    pub sequence: SeqNo,
    /// Share of the tunnel towards the serving MAG.
    tunnel: Option<TunnelHandle>,
    /// Generation of the armed lifetime timer; older firings are stale.
    expiry_generation: u64,
}

impl BindingCacheEntry {
    /// The tunnel this binding forwards through, while registered.
    pub fn tunnel(&self) -> Option<&TunnelHandle> {
        self.tunnel.as_ref()
    }
}

/// Delivered on the LMA strand when a binding lifetime timer fires.
#[derive(Debug)]
pub struct ExpiryEvent {
    pub mn_id: MobileNodeId,
    pub generation: u64,
}

/// What an inbound registration turned out to be, decided before any state
/// is touched.
enum RegistrationKind {
    Fresh,
    Refresh,
    Handoff,
}

/// The binding cache and everything its handlers need: the node directory,
/// the tunnel router, the protocol send queue and the lifetime timers.
pub struct BindingCache<M> {
    entries: HashMap<MobileNodeId, BindingCacheEntry>,
    node_db: Arc<NodeDb>,
    tunnels: TunnelRouter,
    out: mpsc::UnboundedSender<(Message, SocketAddr)>,
    timers: Timers<ExpiryEvent>,
    /// Local tunnel endpoint, the anchor's own address.
    local_address: Ipv6Addr,
    /// Upper bound on granted lifetimes.
    max_lifetime: Duration,
    metrics: M,
}

impl<M: Metrics> BindingCache<M> {
    /// Create an empty binding cache.
    pub fn new(
        node_db: Arc<NodeDb>,
        tunnels: TunnelRouter,
        out: mpsc::UnboundedSender<(Message, SocketAddr)>,
        timers: Timers<ExpiryEvent>,
        local_address: Ipv6Addr,
        max_lifetime: Duration,
        metrics: M,
    ) -> Self {
        BindingCache {
            entries: HashMap::new(),
            node_db,
            tunnels,
            out,
            timers,
            local_address,
            max_lifetime,
            metrics,
        }
    }

    /// Look up the binding of a mobile node.
    pub fn get(&self, mn_id: &MobileNodeId) -> Option<&BindingCacheEntry> {
        self.entries.get(mn_id)
    }

    /// Amount of active bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no binding is active.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Process an inbound proxy binding update.
    pub async fn on_pbu(&mut self, src: SocketAddr, pbu: ProxyBindingUpdate) {
        let IpAddr::V6(mag_address) = src.ip() else {
            warn!(%src, "Dropping PBU which did not arrive over IPv6");
            return;
        };

        let Some(policy) = self.node_db.policy(&pbu.mn_id).cloned() else {
            info!(mn_id = %pbu.mn_id, "PBU for a mobile node which is not provisioned");
            self.metrics.pbu_processed(false);
            self.reply(
                src,
                &pbu,
                BindingStatus::NotAuthorizedForProxyReg,
                Duration::ZERO,
            );
            return;
        };

        if pbu.is_deregistration() {
            self.deregister(src, &pbu).await;
            return;
        }

        // Anti-replay: a lesser sequence is rejected outright. An equal one
        // is tolerated, covering the retransmit echo of the serving MAG and
        // a handoff arriving with the same counter value.
        let kind = match self.entries.get(&pbu.mn_id) {
            None => RegistrationKind::Fresh,
            Some(entry) => {
                if pbu.sequence.out_of_window(&entry.sequence) {
                    debug!(
                        mn_id = %pbu.mn_id,
                        sequence = %pbu.sequence,
                        last = %entry.sequence,
                        "Rejecting PBU with a sequence number out of window"
                    );
                    self.metrics.pbu_processed(false);
                    self.reply(src, &pbu, BindingStatus::SequenceOutOfWindow, Duration::ZERO);
                    return;
                }
                if entry.peer == src {
                    RegistrationKind::Refresh
                } else {
                    RegistrationKind::Handoff
                }
            }
        };

        let granted = pbu.lifetime.min(self.max_lifetime);

        match kind {
            RegistrationKind::Fresh => {
                let Ok(tunnel) = self.install_forwarding(mag_address, &policy.prefixes).await
                else {
                    self.metrics.registration_failed();
                    return;
                };

                let generation = self.arm_expiry(&pbu.mn_id, granted);
                self.entries.insert(
                    pbu.mn_id.clone(),
                    BindingCacheEntry {
                        state: BindingState::Registered,
                        peer: src,
                        prefixes: policy.prefixes.clone(),
                        lifetime: granted,
                        sequence: pbu.sequence,
                        tunnel: Some(tunnel),
                        expiry_generation: generation,
                    },
                );
                info!(mn_id = %pbu.mn_id, peer = %src, "Registered mobile node");
                self.metrics.binding_created();
            }
            RegistrationKind::Refresh => {
                trace!(mn_id = %pbu.mn_id, "Refreshing binding");
                let generation = self.arm_expiry(&pbu.mn_id, granted);
                let entry = self
                    .entries
                    .get_mut(&pbu.mn_id)
                    .expect("Entry existence was decided on this strand; qed");
                entry.sequence = pbu.sequence;
                entry.lifetime = granted;
                entry.expiry_generation = generation;
            }
            RegistrationKind::Handoff => {
                // Bring the new forwarding path up before the old one goes
                // away, so a packet in flight never observes a routeless
                // window.
                let Ok(new_tunnel) = self.install_forwarding(mag_address, &policy.prefixes).await
                else {
                    self.metrics.registration_failed();
                    return;
                };

                let generation = self.arm_expiry(&pbu.mn_id, granted);
                let entry = self
                    .entries
                    .get_mut(&pbu.mn_id)
                    .expect("Entry existence was decided on this strand; qed");
                let old_tunnel = entry.tunnel.replace(new_tunnel);
                let old_prefixes =
                    std::mem::replace(&mut entry.prefixes, policy.prefixes.clone());
                entry.peer = src;
                entry.sequence = pbu.sequence;
                entry.lifetime = granted;
                entry.expiry_generation = generation;

                if let Some(old_tunnel) = old_tunnel {
                    self.release_forwarding(old_tunnel, &old_prefixes).await;
                }
                info!(mn_id = %pbu.mn_id, peer = %src, "Mobile node handed off to a new gateway");
            }
        }

        self.metrics.pbu_processed(true);
        self.reply(src, &pbu, BindingStatus::Accepted, granted);
    }

    /// Process a deregistration (lifetime zero) update. Deregistering a
    /// mobile node without a binding is idempotent and still acknowledged.
    async fn deregister(&mut self, src: SocketAddr, pbu: &ProxyBindingUpdate) {
        if let Some(mut entry) = self.entries.remove(&pbu.mn_id) {
            entry.state = BindingState::Deregistering;
            if let Some(tunnel) = entry.tunnel.take() {
                self.release_forwarding(tunnel, &entry.prefixes).await;
            }
            info!(mn_id = %pbu.mn_id, "Deregistered mobile node");
            self.metrics.binding_removed();
        } else {
            debug!(mn_id = %pbu.mn_id, "Deregistration for a mobile node without a binding");
        }

        self.metrics.pbu_processed(true);
        self.reply(src, pbu, BindingStatus::Accepted, Duration::ZERO);
    }

    /// Process a binding lifetime expiry. The session disappears without a
    /// protocol message; the MAG has its own soft state.
    pub async fn on_expiry(&mut self, event: ExpiryEvent) {
        let Some(entry) = self.entries.get(&event.mn_id) else {
            return;
        };
        if entry.expiry_generation != event.generation {
            trace!(mn_id = %event.mn_id, "Ignoring stale lifetime timer");
            return;
        }

        let mut entry = self
            .entries
            .remove(&event.mn_id)
            .expect("Entry existence was just checked on this strand; qed");
        entry.state = BindingState::Deregistering;
        info!(mn_id = %event.mn_id, "Binding lifetime expired");
        if let Some(tunnel) = entry.tunnel.take() {
            self.release_forwarding(tunnel, &entry.prefixes).await;
        }
        self.metrics.binding_expired();
    }

    /// Arm the lifetime timer of a binding and return its generation.
    fn arm_expiry(&mut self, mn_id: &MobileNodeId, lifetime: Duration) -> u64 {
        let mn_id = mn_id.clone();
        self.timers
            .schedule(lifetime, move |generation| ExpiryEvent { mn_id, generation })
    }

    /// Bring up a tunnel to the given MAG and install one route per prefix
    /// through it. On failure everything installed so far is rolled back.
    async fn install_forwarding(
        &self,
        mag_address: Ipv6Addr,
        prefixes: &[Ipv6Prefix],
    ) -> Result<TunnelHandle, ()> {
        let tunnel = match self
            .tunnels
            .acquire_tunnel(self.local_address, mag_address)
            .await
        {
            Ok(tunnel) => tunnel,
            Err(e) => {
                warn!(%mag_address, "Failed to bring up tunnel: {e}");
                return Err(());
            }
        };

        for (i, prefix) in prefixes.iter().enumerate() {
            if let Err(e) = self.tunnels.add_route(*prefix, tunnel.device()).await {
                warn!(%prefix, "Failed to install route: {e}");
                // Roll back the partial state so a retransmit starts clean.
                self.release_forwarding(tunnel, &prefixes[..i]).await;
                return Err(());
            }
        }

        Ok(tunnel)
    }

    /// Release the routes and the tunnel share of a binding. Failures here
    /// are logged and swallowed: the kernel state is either already gone or
    /// will be swept at the next startup.
    async fn release_forwarding(&self, tunnel: TunnelHandle, prefixes: &[Ipv6Prefix]) {
        for prefix in prefixes {
            if let Err(e) = self.tunnels.remove_route(*prefix, tunnel.device()).await {
                warn!(%prefix, "Failed to remove route: {e}");
            }
        }
        if let Err(e) = self.tunnels.release_tunnel(tunnel).await {
            warn!("Failed to release tunnel: {e}");
        }
    }

    /// Queue the acknowledgement for an update.
    fn reply(
        &self,
        dst: SocketAddr,
        pbu: &ProxyBindingUpdate,
        status: BindingStatus,
        lifetime: Duration,
    ) {
        let pba = ProxyBindingAck {
            status,
            sequence: pbu.sequence,
            lifetime,
            mn_id: pbu.mn_id.clone(),
            handoff: pbu.handoff,
            att: pbu.att,
        };
        if self.out.send((pba.into(), dst)).is_err() {
            warn!("Protocol endpoint is gone, dropping acknowledgement");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv6Addr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::{BindingCache, BindingState};
    use crate::metrics::NoMetrics;
    use crate::mproto::{
        AccessTechnology, BindingStatus, HandoffIndicator, Message, ProxyBindingUpdate,
    };
    use crate::nai::MobileNodeId;
    use crate::node_db::{AnchorEntry, MobileNodePolicy, NodeDb};
    use crate::testutil::{Op, RecordingPlane};
    use crate::timer::Timers;
    use crate::tunnel_router::TunnelRouter;

    const LMA_ADDR: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0xffff, 0, 0, 0, 0, 1);

    fn mn_id() -> MobileNodeId {
        MobileNodeId::new("mn1@example.com").unwrap()
    }

    fn node_db() -> Arc<NodeDb> {
        Arc::new(NodeDb::new(
            [MobileNodePolicy {
                id: mn_id(),
                ll_addr: "aa:bb:cc:00:00:01".parse().unwrap(),
                prefixes: vec!["2001:db8:1::/64".parse().unwrap()],
                lma: "lma1".to_string(),
            }],
            [AnchorEntry {
                id: "lma1".to_string(),
                address: "[2001:db8:ffff::1]:5436".parse().unwrap(),
            }],
        ))
    }

    fn mag_a() -> SocketAddr {
        "[2001:db8:ffff::2]:5436".parse().unwrap()
    }

    fn mag_b() -> SocketAddr {
        "[2001:db8:ffff::3]:5436".parse().unwrap()
    }

    fn pbu(sequence: u16, lifetime_secs: u64, handoff: HandoffIndicator) -> ProxyBindingUpdate {
        ProxyBindingUpdate {
            sequence: sequence.into(),
            lifetime: Duration::from_secs(lifetime_secs),
            mn_id: mn_id(),
            handoff,
            att: AccessTechnology::Ieee80211,
        }
    }

    struct Harness {
        cache: BindingCache<NoMetrics>,
        plane: RecordingPlane,
        out_rx: mpsc::UnboundedReceiver<(Message, SocketAddr)>,
        expiry_rx: mpsc::UnboundedReceiver<super::ExpiryEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let plane = RecordingPlane::default();
            let tunnels = TunnelRouter::spawn(plane.clone());
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
            let cache = BindingCache::new(
                node_db(),
                tunnels,
                out_tx,
                Timers::new(expiry_tx),
                LMA_ADDR,
                Duration::from_secs(3600),
                NoMetrics,
            );
            Harness {
                cache,
                plane,
                out_rx,
                expiry_rx,
            }
        }

        fn sent_pba(&mut self) -> (BindingStatus, Duration, SocketAddr) {
            let (message, dst) = self.out_rx.try_recv().expect("a PBA was queued");
            let Message::Pba(pba) = message else {
                panic!("LMA sent something other than a PBA")
            };
            (pba.status, pba.lifetime, dst)
        }
    }

    #[tokio::test]
    async fn unknown_mobile_node_is_rejected() {
        let mut h = Harness::new();
        let mut update = pbu(1, 3600, HandoffIndicator::FirstAttach);
        update.mn_id = MobileNodeId::new("stranger@example.com").unwrap();

        h.cache.on_pbu(mag_a(), update).await;

        let (status, _, dst) = h.sent_pba();
        assert_eq!(status, BindingStatus::NotAuthorizedForProxyReg);
        assert_eq!(dst, mag_a());
        assert!(h.cache.is_empty());
        assert!(h.plane.journal().is_empty());
    }

    #[tokio::test]
    async fn fresh_registration_installs_forwarding() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(1, 3600, HandoffIndicator::FirstAttach))
            .await;

        let (status, lifetime, _) = h.sent_pba();
        assert_eq!(status, BindingStatus::Accepted);
        assert_eq!(lifetime, Duration::from_secs(3600));

        let entry = h.cache.get(&mn_id()).expect("binding exists");
        assert_eq!(entry.state, BindingState::Registered);
        assert_eq!(entry.peer, mag_a());
        let device = entry.tunnel().unwrap().device();

        assert_eq!(
            h.plane.journal(),
            vec![
                Op::TunnelAdd("pmip00000002".to_string()),
                Op::LinkSetUp(device, true),
                Op::RouteAdd("2001:db8:1::/64".parse().unwrap(), device),
            ]
        );
    }

    #[tokio::test]
    async fn granted_lifetime_is_capped_by_policy() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(1, 7200, HandoffIndicator::FirstAttach))
            .await;

        let (status, lifetime, _) = h.sent_pba();
        assert_eq!(status, BindingStatus::Accepted);
        assert_eq!(lifetime, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn stale_sequence_is_rejected_without_state_change() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(10, 3600, HandoffIndicator::FirstAttach))
            .await;
        let _ = h.sent_pba();
        let ops_before = h.plane.journal().len();

        h.cache
            .on_pbu(mag_a(), pbu(5, 3600, HandoffIndicator::ReRegistration))
            .await;

        let (status, _, _) = h.sent_pba();
        assert_eq!(status, BindingStatus::SequenceOutOfWindow);
        assert_eq!(h.cache.get(&mn_id()).unwrap().sequence, 10.into());
        assert_eq!(h.plane.journal().len(), ops_before);
    }

    #[tokio::test]
    async fn refresh_from_serving_mag_keeps_forwarding() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(1, 3600, HandoffIndicator::FirstAttach))
            .await;
        let _ = h.sent_pba();
        let ops_before = h.plane.journal().len();

        h.cache
            .on_pbu(mag_a(), pbu(2, 3600, HandoffIndicator::ReRegistration))
            .await;

        let (status, _, _) = h.sent_pba();
        assert_eq!(status, BindingStatus::Accepted);
        assert_eq!(h.cache.get(&mn_id()).unwrap().sequence, 2.into());
        assert_eq!(h.plane.journal().len(), ops_before);
    }

    #[tokio::test]
    async fn retransmit_echo_from_serving_mag_is_accepted() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(1, 3600, HandoffIndicator::FirstAttach))
            .await;
        let _ = h.sent_pba();

        // The same sequence again, as a retransmitting MAG would send it.
        h.cache
            .on_pbu(mag_a(), pbu(1, 3600, HandoffIndicator::FirstAttach))
            .await;
        let (status, _, _) = h.sent_pba();
        assert_eq!(status, BindingStatus::Accepted);
    }

    #[tokio::test]
    async fn handoff_installs_before_removing() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(1, 3600, HandoffIndicator::FirstAttach))
            .await;
        let _ = h.sent_pba();
        let old_device = h.cache.get(&mn_id()).unwrap().tunnel().unwrap().device();

        h.cache
            .on_pbu(mag_b(), pbu(2, 3600, HandoffIndicator::BetweenMags))
            .await;
        let (status, _, dst) = h.sent_pba();
        assert_eq!(status, BindingStatus::Accepted);
        assert_eq!(dst, mag_b());

        let entry = h.cache.get(&mn_id()).unwrap();
        assert_eq!(entry.peer, mag_b());
        let new_device = entry.tunnel().unwrap().device();
        assert_ne!(new_device, old_device);

        // The new path is complete before the old one is touched.
        let prefix = "2001:db8:1::/64".parse().unwrap();
        let journal = h.plane.journal();
        let new_route = journal
            .iter()
            .position(|op| *op == Op::RouteAdd(prefix, new_device))
            .expect("route through the new tunnel was installed");
        let old_route_removed = journal
            .iter()
            .position(|op| *op == Op::RouteDel(prefix, old_device))
            .expect("route through the old tunnel was removed");
        assert!(new_route < old_route_removed);
        assert!(journal.contains(&Op::TunnelDel("pmip00000002".to_string())));
    }

    #[tokio::test]
    async fn equal_sequence_from_other_mag_is_a_handoff() {
        // A gateway seeing the node for the first time starts its own
        // counter, which may collide with the last accepted value. That is
        // still a valid handoff.
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(7, 3600, HandoffIndicator::FirstAttach))
            .await;
        let _ = h.sent_pba();

        h.cache
            .on_pbu(mag_b(), pbu(7, 3600, HandoffIndicator::BetweenMags))
            .await;
        let (status, _, _) = h.sent_pba();
        assert_eq!(status, BindingStatus::Accepted);
        assert_eq!(h.cache.get(&mn_id()).unwrap().peer, mag_b());
    }

    #[tokio::test]
    async fn failed_handoff_keeps_the_old_binding() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(1, 3600, HandoffIndicator::FirstAttach))
            .await;
        let _ = h.sent_pba();
        let ops_before = h.plane.journal().len();

        // The tunnel towards the new gateway cannot be brought up.
        h.plane.fail_tunnel_adds();
        h.cache
            .on_pbu(mag_b(), pbu(2, 3600, HandoffIndicator::BetweenMags))
            .await;

        // No acknowledgement and no state change: the old gateway keeps
        // serving and the new one retransmits.
        assert!(h.out_rx.try_recv().is_err());
        let entry = h.cache.get(&mn_id()).unwrap();
        assert_eq!(entry.peer, mag_a());
        assert_eq!(entry.sequence, 1.into());
        assert_eq!(h.plane.journal().len(), ops_before);
    }

    #[tokio::test]
    async fn deregistration_is_idempotent() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(1, 3600, HandoffIndicator::FirstAttach))
            .await;
        let _ = h.sent_pba();

        h.cache
            .on_pbu(mag_a(), pbu(2, 0, HandoffIndicator::ReRegistration))
            .await;
        let (status, lifetime, _) = h.sent_pba();
        assert_eq!(status, BindingStatus::Accepted);
        assert_eq!(lifetime, Duration::ZERO);
        assert!(h.cache.is_empty());

        // Forwarding is gone.
        let journal = h.plane.journal();
        assert!(journal.iter().any(|op| matches!(op, Op::RouteDel(_, _))));
        assert!(journal.contains(&Op::TunnelDel("pmip00000002".to_string())));

        // The retransmitted deregistration produces the same answer.
        h.cache
            .on_pbu(mag_a(), pbu(2, 0, HandoffIndicator::ReRegistration))
            .await;
        let (status, lifetime, _) = h.sent_pba();
        assert_eq!(status, BindingStatus::Accepted);
        assert_eq!(lifetime, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_removes_binding_without_a_message() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(1, 4, HandoffIndicator::FirstAttach))
            .await;
        let _ = h.sent_pba();

        let event = h.expiry_rx.recv().await.expect("lifetime timer fired");
        h.cache.on_expiry(event).await;

        assert!(h.cache.is_empty());
        assert!(h.out_rx.try_recv().is_err());
        assert!(h
            .plane
            .journal()
            .contains(&Op::TunnelDel("pmip00000002".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_after_refresh_is_ignored() {
        let mut h = Harness::new();
        h.cache
            .on_pbu(mag_a(), pbu(1, 4, HandoffIndicator::FirstAttach))
            .await;
        let _ = h.sent_pba();

        // Refresh rearms the timer before the first one fires.
        h.cache
            .on_pbu(mag_a(), pbu(2, 3600, HandoffIndicator::ReRegistration))
            .await;
        let _ = h.sent_pba();

        // The original timer still fires after its 4 seconds, but its
        // generation is stale by now.
        let event = h.expiry_rx.recv().await.expect("old lifetime timer fired");
        h.cache.on_expiry(event).await;

        assert!(h.cache.get(&mn_id()).is_some());
    }
}
