// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use dashmap::DashMap;
use tracing::debug;

use tessera_types::partition::Replica;
use tessera_types::NodeId;

/// Maps raft members to the addresses they serve on. Shared by all partitions of the node.
#[derive(Debug, Default)]
pub struct RaftResolver {
    nodes: DashMap<NodeId, Replica>,
}

impl RaftResolver {
    pub fn with_replicas(replicas: impl IntoIterator<Item = Replica>) -> Self {
        let resolver = Self::default();
        for replica in replicas {
            resolver.add_node(replica);
        }
        resolver
    }

    pub fn add_node(&self, replica: Replica) {
        debug!(node_id = %replica.node_id, rpc_addr = %replica.rpc_addr, "Adding raft member");
        self.nodes.insert(replica.node_id, replica);
    }

    pub fn delete_node(&self, node_id: NodeId) -> Option<Replica> {
        debug!(%node_id, "Removing raft member");
        self.nodes.remove(&node_id).map(|(_, replica)| replica)
    }

    pub fn to_replica(&self, node_id: NodeId) -> Option<Replica> {
        self.nodes.get(&node_id).map(|replica| replica.clone())
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_replace_and_delete() {
        let resolver = RaftResolver::with_replicas([
            Replica::new(NodeId::new(1), "10.0.0.1:8081"),
            Replica::new(NodeId::new(2), "10.0.0.2:8081"),
        ]);
        assert_eq!(resolver.len(), 2);

        resolver.add_node(Replica::new(NodeId::new(2), "10.0.0.22:8081"));
        assert_eq!(
            resolver.to_replica(NodeId::new(2)).map(|r| r.rpc_addr),
            Some("10.0.0.22:8081".to_owned())
        );

        assert!(resolver.delete_node(NodeId::new(1)).is_some());
        assert!(resolver.delete_node(NodeId::new(1)).is_none());
        assert!(!resolver.contains(NodeId::new(1)));
        assert!(resolver.to_replica(NodeId::INVALID).is_none());
    }
}
