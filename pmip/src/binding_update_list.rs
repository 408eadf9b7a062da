//! The binding update list of a mobile access gateway.
//!
//! One registration state machine per mobile node the MAG currently serves.
//! Attachment events from the access driver start a registration with the
//! node's anchor; the acknowledgement brings up the forwarding (tunnel to
//! the anchor, downlink routes on the access link) and starts router
//! advertisement emission. Everything is soft state: registrations are
//! refreshed before the granted lifetime runs out, and abandoned when the
//! anchor stops answering.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::mac::MacAddress;
use crate::metrics::Metrics;
use crate::mproto::{HandoffIndicator, Message, ProxyBindingAck, ProxyBindingUpdate};
use crate::nai::MobileNodeId;
use crate::node_db::NodeDb;
use crate::prefix::Ipv6Prefix;
use crate::router_advertiser::{RaOutput, RouterAdvertiser};
use crate::sequence_number::SeqNo;
use crate::timer::Timers;
use crate::tunnel_router::{TunnelHandle, TunnelRouter};
use crate::AccessLink;

/// First retransmission timeout for an unacknowledged PBU.
pub const INITIAL_BINDACK_TIMEOUT: Duration = Duration::from_millis(1_000);
/// Ceiling of the exponential retransmission backoff.
pub const MAX_BINDACK_TIMEOUT: Duration = Duration::from_secs(32);
/// Amount of retransmissions before a registration is abandoned.
pub const MAX_BINDACK_RETRIES: u32 = 3;

/// Lifecycle state of a binding update list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// No registration in flight or active. Entries in this state are not
    /// stored.
    Idle,
    /// A PBU is outstanding, waiting for its acknowledgement.
    Registering,
    /// The binding is active and forwarding is configured.
    Registered,
    /// A deregistration PBU is outstanding.
    Deregistering,
}

/// The registration a MAG maintains with an anchor for one mobile node.
#[derive(Debug)]
pub struct BindingUpdateEntry {
    /// Lifecycle state.
    pub state: RegistrationState,
    /// Access link the node is attached on.
    pub link: u32,
    /// Link-layer address the node attached with.
    pub ll_addr: MacAddress,
    /// Transport address of the node's anchor.
    pub lma: SocketAddr,
    /// Sequence number of the outstanding (or last acknowledged) PBU.
    pub sequence: SeqNo,
    /// Granted lifetime of the active registration.
    pub lifetime: Duration,
    /// Handoff indicator of the outstanding registration.
    pub handoff: HandoffIndicator,
    /// Amount of retransmissions of the outstanding PBU.
    retransmit_count: u32,
    /// Current retransmission backoff.
    backoff: Duration,
    /// Share of the tunnel towards the anchor.
    tunnel: Option<TunnelHandle>,
    /// Downlink routes currently installed, as (prefix, device) pairs.
    routes: Vec<(Ipv6Prefix, u32)>,
    /// Generation of the armed timer; older firings are stale.
    timer_generation: u64,
}

impl BindingUpdateEntry {
    /// The tunnel this registration forwards through, while registered.
    pub fn tunnel(&self) -> Option<&TunnelHandle> {
        self.tunnel.as_ref()
    }
}

/// Which timer fired for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The outstanding PBU was not acknowledged in time.
    Retransmit,
    /// The active registration approaches its lifetime and must be
    /// refreshed.
    Refresh,
}

/// Delivered on the MAG strand when an entry timer fires.
#[derive(Debug)]
pub struct TimerEvent {
    pub mn_id: MobileNodeId,
    pub generation: u64,
    pub kind: TimerKind,
}

/// The binding update list and everything its handlers need.
pub struct BindingUpdateList<O, M> {
    entries: HashMap<MobileNodeId, BindingUpdateEntry>,
    node_db: Arc<NodeDb>,
    tunnels: TunnelRouter,
    advertiser: RouterAdvertiser<O>,
    out: mpsc::UnboundedSender<(Message, SocketAddr)>,
    timers: Timers<TimerEvent>,
    /// Local tunnel endpoint, the gateway's own address.
    local_address: Ipv6Addr,
    /// The access links this gateway serves, by interface index.
    links: HashMap<u32, AccessLink>,
    /// Lifetime requested in registrations.
    requested_lifetime: Duration,
    metrics: M,
}

impl<O: RaOutput, M: Metrics> BindingUpdateList<O, M> {
    /// Create an empty binding update list.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_db: Arc<NodeDb>,
        tunnels: TunnelRouter,
        advertiser: RouterAdvertiser<O>,
        out: mpsc::UnboundedSender<(Message, SocketAddr)>,
        timers: Timers<TimerEvent>,
        local_address: Ipv6Addr,
        links: impl IntoIterator<Item = AccessLink>,
        requested_lifetime: Duration,
        metrics: M,
    ) -> Self {
        BindingUpdateList {
            entries: HashMap::new(),
            node_db,
            tunnels,
            advertiser,
            out,
            timers,
            local_address,
            links: links.into_iter().map(|l| (l.index, l)).collect(),
            requested_lifetime,
            metrics,
        }
    }

    /// Look up the registration of a mobile node.
    pub fn get(&self, mn_id: &MobileNodeId) -> Option<&BindingUpdateEntry> {
        self.entries.get(mn_id)
    }

    /// Amount of tracked registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no registration is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A terminal attached on one of our access links.
    pub fn attach(&mut self, ll_addr: MacAddress, link: u32) {
        let Some(policy) = self.node_db.policy_by_ll_addr(&ll_addr).cloned() else {
            debug!(%ll_addr, "Attachment of an unprovisioned terminal, ignoring");
            return;
        };
        if !self.links.contains_key(&link) {
            warn!(%ll_addr, link, "Attachment on an unknown access link, ignoring");
            return;
        }
        let Some(anchor) = self.node_db.anchor(&policy.lma) else {
            warn!(mn_id = %policy.id, lma = %policy.lma, "Mobile node has no provisioned anchor");
            return;
        };
        let lma = anchor.address;

        let handoff = match self.entries.get(&policy.id) {
            Some(entry) if entry.state == RegistrationState::Registered => {
                if entry.link == link {
                    trace!(mn_id = %policy.id, link, "Spurious attachment, already registered here");
                    return;
                }
                // Re-attach on another link. The old forwarding stays until
                // the anchor confirms the new registration.
                info!(mn_id = %policy.id, from = entry.link, to = link, "Mobile node handing off");
                self.advertiser.stop(entry.link, &policy.id);
                HandoffIndicator::BetweenMags
            }
            Some(_) => {
                // A registration attempt is already in flight; start over
                // with the newest attachment information.
                debug!(mn_id = %policy.id, link, "Restarting registration after re-attachment");
                HandoffIndicator::Unknown
            }
            None => HandoffIndicator::FirstAttach,
        };

        let sequence = match self.entries.get(&policy.id) {
            Some(entry) => entry.sequence.next(),
            None => SeqNo::INITIAL,
        };

        let entry = self
            .entries
            .entry(policy.id.clone())
            .or_insert_with(|| BindingUpdateEntry {
                state: RegistrationState::Idle,
                link,
                ll_addr,
                lma,
                sequence,
                lifetime: Duration::ZERO,
                handoff,
                retransmit_count: 0,
                backoff: INITIAL_BINDACK_TIMEOUT,
                tunnel: None,
                routes: Vec::new(),
                timer_generation: 0,
            });
        entry.state = RegistrationState::Registering;
        entry.link = link;
        entry.ll_addr = ll_addr;
        entry.lma = lma;
        entry.sequence = sequence;
        entry.handoff = handoff;
        entry.retransmit_count = 0;
        entry.backoff = INITIAL_BINDACK_TIMEOUT;

        self.transmit(&policy.id);
    }

    /// A terminal dissociated from one of our access links.
    pub fn detach(&mut self, ll_addr: MacAddress, link: u32) {
        let Some(policy) = self.node_db.policy_by_ll_addr(&ll_addr).cloned() else {
            debug!(%ll_addr, "Detachment of an unprovisioned terminal, ignoring");
            return;
        };
        let Some(entry) = self.entries.get_mut(&policy.id) else {
            debug!(mn_id = %policy.id, "Detachment without a registration, ignoring");
            return;
        };
        if entry.link != link {
            // The node already attached elsewhere; this is the old link
            // reporting the past.
            debug!(mn_id = %policy.id, link, "Detachment from a superseded link, ignoring");
            return;
        }

        info!(mn_id = %policy.id, link, "Mobile node detached, deregistering");
        self.advertiser.stop(link, &policy.id);

        let entry = self
            .entries
            .get_mut(&policy.id)
            .expect("Entry existence was just checked on this strand; qed");
        entry.state = RegistrationState::Deregistering;
        entry.sequence = entry.sequence.next();
        entry.retransmit_count = 0;
        entry.backoff = INITIAL_BINDACK_TIMEOUT;

        self.transmit(&policy.id);
    }

    /// Process an inbound proxy binding acknowledgement.
    pub async fn on_pba(&mut self, src: SocketAddr, pba: ProxyBindingAck) {
        let Some(entry) = self.entries.get(&pba.mn_id) else {
            debug!(mn_id = %pba.mn_id, "Acknowledgement without a registration, dropping");
            return;
        };
        if entry.sequence != pba.sequence {
            debug!(
                mn_id = %pba.mn_id,
                sequence = %pba.sequence,
                outstanding = %entry.sequence,
                "Acknowledgement for a different sequence, dropping"
            );
            return;
        }
        if entry.lma != src {
            debug!(mn_id = %pba.mn_id, %src, "Acknowledgement from an unexpected peer, dropping");
            return;
        }

        self.metrics.pba_processed();
        match entry.state {
            RegistrationState::Registering => {
                if pba.status.is_success() {
                    self.complete_registration(&pba).await;
                } else {
                    warn!(
                        mn_id = %pba.mn_id,
                        status = u8::from(pba.status),
                        "Anchor rejected registration"
                    );
                    self.metrics.registration_failed();
                    self.abandon(&pba.mn_id).await;
                }
            }
            RegistrationState::Deregistering => {
                info!(mn_id = %pba.mn_id, "Deregistration acknowledged");
                let mut entry = self
                    .entries
                    .remove(&pba.mn_id)
                    .expect("Entry existence was just checked on this strand; qed");
                self.teardown_forwarding(&mut entry).await;
                self.metrics.binding_removed();
            }
            RegistrationState::Registered | RegistrationState::Idle => {
                trace!(mn_id = %pba.mn_id, "Acknowledgement in a settled state, dropping");
            }
        }
    }

    /// An entry timer fired.
    pub async fn on_timer(&mut self, event: TimerEvent) {
        let Some(entry) = self.entries.get(&event.mn_id) else {
            return;
        };
        if entry.timer_generation != event.generation {
            trace!(mn_id = %event.mn_id, "Ignoring stale timer");
            return;
        }

        match event.kind {
            TimerKind::Retransmit => self.retransmit_timeout(&event.mn_id).await,
            TimerKind::Refresh => self.refresh_timeout(&event.mn_id),
        }
    }

    /// The outstanding PBU went unacknowledged for a full backoff period.
    async fn retransmit_timeout(&mut self, mn_id: &MobileNodeId) {
        let entry = self
            .entries
            .get_mut(mn_id)
            .expect("Caller verified entry existence on this strand; qed");
        if !matches!(
            entry.state,
            RegistrationState::Registering | RegistrationState::Deregistering
        ) {
            return;
        }

        entry.retransmit_count += 1;
        if entry.retransmit_count > MAX_BINDACK_RETRIES {
            warn!(%mn_id, "Anchor did not answer, abandoning registration");
            self.metrics.registration_failed();
            self.advertiser.stop(entry.link, mn_id);
            self.abandon(mn_id).await;
            return;
        }

        debug!(
            %mn_id,
            attempt = entry.retransmit_count,
            backoff = ?entry.backoff,
            "Retransmitting PBU"
        );
        self.metrics.pbu_retransmitted();
        // The retransmission reuses the original sequence number, which the
        // anchor tolerates as an echo.
        entry.backoff = (entry.backoff * 2).min(MAX_BINDACK_TIMEOUT);
        self.transmit(mn_id);
    }

    /// The active registration reached 7/8 of its granted lifetime.
    fn refresh_timeout(&mut self, mn_id: &MobileNodeId) {
        let entry = self
            .entries
            .get_mut(mn_id)
            .expect("Caller verified entry existence on this strand; qed");
        if entry.state != RegistrationState::Registered {
            return;
        }

        trace!(%mn_id, "Refreshing registration");
        entry.state = RegistrationState::Registering;
        entry.sequence = entry.sequence.next();
        entry.handoff = HandoffIndicator::ReRegistration;
        entry.retransmit_count = 0;
        entry.backoff = INITIAL_BINDACK_TIMEOUT;

        self.transmit(mn_id);
    }

    /// Queue the PBU for the current state of an entry and arm the
    /// retransmission timer. Used for the first transmission and every
    /// retransmission alike; the sequence number is whatever the entry
    /// holds.
    fn transmit(&mut self, mn_id: &MobileNodeId) {
        let requested_lifetime = self.requested_lifetime;
        let entry = self
            .entries
            .get_mut(mn_id)
            .expect("Caller verified entry existence on this strand; qed");

        let lifetime = match entry.state {
            RegistrationState::Deregistering => Duration::ZERO,
            _ => requested_lifetime,
        };
        let att = self
            .links
            .get(&entry.link)
            .map_or(crate::mproto::AccessTechnology::Ieee80211, |l| l.att);
        let pbu = ProxyBindingUpdate {
            sequence: entry.sequence,
            lifetime,
            mn_id: mn_id.clone(),
            handoff: entry.handoff,
            att,
        };
        if self.out.send((pbu.into(), entry.lma)).is_err() {
            warn!("Protocol endpoint is gone, dropping registration");
        }

        let backoff = entry.backoff;
        let generation = {
            let mn_id = mn_id.clone();
            self.timers.schedule(backoff, move |generation| TimerEvent {
                mn_id,
                generation,
                kind: TimerKind::Retransmit,
            })
        };
        self.entries
            .get_mut(mn_id)
            .expect("Entry was present a moment ago on this strand; qed")
            .timer_generation = generation;
    }

    /// A successful acknowledgement for an outstanding registration:
    /// reconcile forwarding with the current attachment, start advertising
    /// and arm the refresh timer.
    async fn complete_registration(&mut self, pba: &ProxyBindingAck) {
        let Some(policy) = self.node_db.policy(&pba.mn_id).cloned() else {
            // The policy vanished between PBU and PBA; nothing to install.
            warn!(mn_id = %pba.mn_id, "Registration acknowledged for an unprovisioned node");
            return;
        };

        let (link, lma, old_routes) = {
            let entry = self
                .entries
                .get(&pba.mn_id)
                .expect("Caller verified entry existence on this strand; qed");
            (entry.link, entry.lma, entry.routes.clone())
        };
        let IpAddr::V6(lma_address) = lma.ip() else {
            warn!(mn_id = %pba.mn_id, "Anchor address is not IPv6, cannot tunnel");
            return;
        };

        // Tunnel towards the anchor, shared by every node it anchors.
        let has_tunnel = self
            .entries
            .get(&pba.mn_id)
            .map(|e| e.tunnel.is_some())
            .unwrap_or_default();
        // Whether a superseded attachment is still forwarding. If the new
        // path cannot be brought up, that one must be left alone: only the
        // in-flight attempt is rolled back, and the armed retransmission
        // timer drives a retry while the node stays reachable on the old
        // path.
        let had_forwarding = has_tunnel || !old_routes.is_empty();
        let tunnel = if has_tunnel {
            None
        } else {
            match self
                .tunnels
                .acquire_tunnel(self.local_address, lma_address)
                .await
            {
                Ok(tunnel) => Some(tunnel),
                Err(e) => {
                    warn!(mn_id = %pba.mn_id, "Failed to bring up tunnel: {e}");
                    self.metrics.registration_failed();
                    if !had_forwarding {
                        self.abandon(&pba.mn_id).await;
                    }
                    return;
                }
            }
        };

        // Downlink routes for the current attachment, installed before the
        // superseded ones are removed.
        let new_routes: Vec<_> = policy.prefixes.iter().map(|p| (*p, link)).collect();
        let mut installed = Vec::new();
        for (prefix, device) in &new_routes {
            if old_routes.contains(&(*prefix, *device)) {
                continue;
            }
            if let Err(e) = self.tunnels.add_route(*prefix, *device).await {
                warn!(%prefix, "Failed to install downlink route: {e}");
                self.metrics.registration_failed();
                // Roll back this round only; the routes of a superseded
                // attachment are not ours to touch here.
                for (prefix, device) in installed {
                    if let Err(e) = self.tunnels.remove_route(prefix, device).await {
                        warn!(%prefix, "Failed to roll back route: {e}");
                    }
                }
                if let Some(tunnel) = tunnel {
                    if let Err(e) = self.tunnels.release_tunnel(tunnel).await {
                        warn!("Failed to roll back tunnel: {e}");
                    }
                }
                if !had_forwarding {
                    self.abandon(&pba.mn_id).await;
                }
                return;
            }
            installed.push((*prefix, *device));
        }
        for (prefix, device) in &old_routes {
            if new_routes.contains(&(*prefix, *device)) {
                continue;
            }
            if let Err(e) = self.tunnels.remove_route(*prefix, *device).await {
                warn!(%prefix, "Failed to remove superseded route: {e}");
            }
        }

        let granted = pba.lifetime;
        let generation = {
            let mn_id = pba.mn_id.clone();
            // Refresh well before the anchor forgets us.
            self.timers
                .schedule(granted * 7 / 8, move |generation| TimerEvent {
                    mn_id,
                    generation,
                    kind: TimerKind::Refresh,
                })
        };

        let entry = self
            .entries
            .get_mut(&pba.mn_id)
            .expect("Entry was present a moment ago on this strand; qed");
        entry.state = RegistrationState::Registered;
        entry.lifetime = granted;
        entry.routes = new_routes;
        if let Some(tunnel) = tunnel {
            entry.tunnel = Some(tunnel);
        }
        entry.timer_generation = generation;
        let ll_addr = entry.ll_addr;

        info!(mn_id = %pba.mn_id, link, lifetime = ?granted, "Registration complete");
        if let Some(link) = self.links.get(&link) {
            self.advertiser
                .start(link, pba.mn_id.clone(), ll_addr, policy.prefixes.clone());
        }
    }

    /// Drop a registration and its forwarding after a failure. The entry
    /// goes back to idle, which is not stored.
    async fn abandon(&mut self, mn_id: &MobileNodeId) {
        if let Some(mut entry) = self.entries.remove(mn_id) {
            self.advertiser.stop(entry.link, mn_id);
            self.teardown_forwarding(&mut entry).await;
        }
    }

    /// Release the routes and the tunnel share of an entry. Failures are
    /// logged and swallowed, mirroring the cache side.
    async fn teardown_forwarding(&self, entry: &mut BindingUpdateEntry) {
        for (prefix, device) in entry.routes.drain(..) {
            if let Err(e) = self.tunnels.remove_route(prefix, device).await {
                warn!(%prefix, "Failed to remove route: {e}");
            }
        }
        if let Some(tunnel) = entry.tunnel.take() {
            if let Err(e) = self.tunnels.release_tunnel(tunnel).await {
                warn!("Failed to release tunnel: {e}");
            }
        }
    }
}
