//! Read-only view of cluster membership.
//!
//! The pipeline never owns or changes the topology; it only asks for the
//! current consistent hash to decide how finely a parallel traversal is
//! split. A cache that is not distributed simply has no topology.

use crate::error::{CacheError, Result};
use std::sync::{Arc, RwLock};

/// Members and segment count of the current cluster view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistentHash {
    members: Vec<String>,
    num_segments: usize,
}

impl ConsistentHash {
    pub fn new(members: Vec<String>, num_segments: usize) -> Result<Self> {
        if members.is_empty() {
            return Err(CacheError::Config(
                "consistent hash needs at least one member".to_string(),
            ));
        }
        if num_segments == 0 {
            return Err(CacheError::Config(format!(
                "invalid segment count: {}",
                num_segments
            )));
        }
        Ok(Self {
            members,
            num_segments,
        })
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn num_segments(&self) -> usize {
        self.num_segments
    }
}

/// Supplies the current topology, if the cache is distributed
pub trait TopologyProvider: Send + Sync {
    fn current_topology(&self) -> Option<Arc<ConsistentHash>>;
}

/// Topology installed by whoever manages membership
#[derive(Debug, Default)]
pub struct StaticTopology {
    current: RwLock<Option<Arc<ConsistentHash>>>,
}

impl StaticTopology {
    pub fn new(hash: ConsistentHash) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(hash))),
        }
    }

    /// Replace the installed view
    pub fn install(&self, hash: Option<ConsistentHash>) -> Result<()> {
        let mut current = self
            .current
            .write()
            .map_err(|e| CacheError::Storage(format!("Lock error: {}", e)))?;
        *current = hash.map(Arc::new);
        Ok(())
    }
}

impl TopologyProvider for StaticTopology {
    fn current_topology(&self) -> Option<Arc<ConsistentHash>> {
        self.current.read().ok().and_then(|current| current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("node-{}", i)).collect()
    }

    #[test]
    fn test_invalid_topologies() {
        assert!(ConsistentHash::new(vec![], 16).is_err());
        assert!(ConsistentHash::new(members(2), 0).is_err());
        assert_eq!(ConsistentHash::new(members(2), 4).unwrap().num_segments(), 4);
    }

    #[test]
    fn test_static_topology_install() {
        let topology = StaticTopology::default();
        assert!(topology.current_topology().is_none());
        topology
            .install(Some(ConsistentHash::new(members(2), 8).unwrap()))
            .unwrap();
        assert_eq!(topology.current_topology().unwrap().members().len(), 2);
    }
}
