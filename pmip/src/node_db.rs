//! The static directory of provisioned mobile nodes and mobility anchors.
//!
//! Both node types consult this database: the LMA to authorize proxy
//! registrations and learn the prefixes it anchors for a mobile node, the
//! MAG to map link-layer attachment events to a mobile node and to find the
//! anchor it must register with. The database is loaded once at startup and
//! is immutable afterwards; a failed lookup is a normal outcome, not an
//! error.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;

use crate::mac::MacAddress;
use crate::nai::MobileNodeId;
use crate::prefix::Ipv6Prefix;

/// The provisioned policy of a single mobile node.
#[derive(Debug, Clone, Deserialize)]
pub struct MobileNodePolicy {
    /// The globally unique identifier of the mobile node.
    pub id: MobileNodeId,
    /// The link-layer address the node attaches with.
    pub ll_addr: MacAddress,
    /// The home network prefixes delegated to this node, in delegation order.
    pub prefixes: Vec<Ipv6Prefix>,
    /// The identifier of the anchor owning the prefixes.
    pub lma: String,
}

/// A provisioned local mobility anchor.
#[derive(Debug, Clone, Deserialize)]
pub struct AnchorEntry {
    /// The identifier of the anchor.
    pub id: String,
    /// The transport address PBUs for this anchor are sent to.
    pub address: SocketAddr,
}

/// The in-memory directory, indexed for the two lookups the mobility core
/// performs.
#[derive(Debug, Default)]
pub struct NodeDb {
    by_id: HashMap<MobileNodeId, Arc<MobileNodePolicy>>,
    by_ll_addr: HashMap<MacAddress, Arc<MobileNodePolicy>>,
    anchors: HashMap<String, AnchorEntry>,
}

impl NodeDb {
    /// Build a new `NodeDb` from the provisioned entries.
    pub fn new(
        nodes: impl IntoIterator<Item = MobileNodePolicy>,
        anchors: impl IntoIterator<Item = AnchorEntry>,
    ) -> Self {
        let mut by_id = HashMap::new();
        let mut by_ll_addr = HashMap::new();
        for policy in nodes {
            let policy = Arc::new(policy);
            by_ll_addr.insert(policy.ll_addr, policy.clone());
            by_id.insert(policy.id.clone(), policy);
        }
        let anchors = anchors.into_iter().map(|a| (a.id.clone(), a)).collect();

        NodeDb {
            by_id,
            by_ll_addr,
            anchors,
        }
    }

    /// Look up a mobile node policy by identifier.
    pub fn policy(&self, id: &MobileNodeId) -> Option<&Arc<MobileNodePolicy>> {
        self.by_id.get(id)
    }

    /// Look up a mobile node policy by the link-layer address it attaches
    /// with. This is how access driver events are mapped to mobile nodes.
    pub fn policy_by_ll_addr(&self, ll_addr: &MacAddress) -> Option<&Arc<MobileNodePolicy>> {
        self.by_ll_addr.get(ll_addr)
    }

    /// Look up an anchor by identifier.
    pub fn anchor(&self, id: &str) -> Option<&AnchorEntry> {
        self.anchors.get(id)
    }

    /// Amount of provisioned mobile nodes.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the directory has no mobile nodes at all.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::{AnchorEntry, MobileNodePolicy, NodeDb};
    use crate::nai::MobileNodeId;

    fn lma_addr() -> SocketAddr {
        "[2001:db8:ffff::1]:5436".parse().unwrap()
    }

    fn test_db() -> NodeDb {
        NodeDb::new(
            [MobileNodePolicy {
                id: MobileNodeId::new("mn1@example.com").unwrap(),
                ll_addr: "aa:bb:cc:00:00:01".parse().unwrap(),
                prefixes: vec!["2001:db8:1::/64".parse().unwrap()],
                lma: "lma1".to_string(),
            }],
            [AnchorEntry {
                id: "lma1".to_string(),
                address: lma_addr(),
            }],
        )
    }

    #[test]
    fn lookups() {
        let db = test_db();
        let id = MobileNodeId::new("mn1@example.com").unwrap();

        let policy = db.policy(&id).expect("provisioned node is found");
        assert_eq!(policy.lma, "lma1");

        let by_mac = db
            .policy_by_ll_addr(&"aa:bb:cc:00:00:01".parse().unwrap())
            .expect("provisioned node is found by link-layer address");
        assert_eq!(by_mac.id, id);

        assert_eq!(db.anchor("lma1").unwrap().address, lma_addr());
    }

    #[test]
    fn unknown_lookups_are_none() {
        let db = test_db();
        assert!(db
            .policy(&MobileNodeId::new("stranger@example.com").unwrap())
            .is_none());
        assert!(db
            .policy_by_ll_addr(&"de:ad:be:ef:00:00".parse().unwrap())
            .is_none());
        assert!(db.anchor("lma2").is_none());
    }
}
