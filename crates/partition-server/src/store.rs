// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use tessera_types::errors::GenericError;
use tessera_types::partition::{
    ChangeMemberOp, IndexStatus, Partition, PartitionInfo, PartitionStatus, RaftStatus, Replica,
    Space,
};
use tessera_types::query::{SearchRequest, SearchResponse};
use tessera_types::{NodeId, PartitionId, Version};

use crate::error::{EngineError, RaftError, StoreError};
use crate::resolver::RaftResolver;

/// Consensus member of one partition on this node.
#[async_trait]
pub trait RaftNode: Send + Sync + 'static {
    fn is_leader(&self) -> bool;

    /// Leader as currently known by this member, [`NodeId::INVALID`] while there is none.
    fn leader(&self) -> NodeId;

    async fn change_member(&self, op: ChangeMemberOp, node_id: NodeId) -> Result<(), RaftError>;

    fn status(&self) -> RaftStatus;

    /// Members of the group this node currently cannot reach.
    fn unreachable(&self) -> Vec<NodeId>;

    async fn stop(&self) -> Result<(), RaftError>;
}

pub trait Reader: Send + Sync {
    fn doc_count(&self) -> Result<u64, EngineError>;

    /// Bytes occupied by the partition.
    fn capacity(&self) -> Result<u64, EngineError>;
}

/// Storage and indexing engine of one partition.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    fn reader(&self) -> &dyn Reader;

    fn index_status(&self) -> IndexStatus;

    async fn update_schema(&self, space: &Space) -> Result<(), EngineError>;

    /// Runs `request` against this partition only. The response holds at most
    /// [`SearchRequest::window`] hits in the request's sort order.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, EngineError>;

    async fn delete_by_query(&self, request: &SearchRequest) -> Result<u64, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Opens the consensus member and engine of a partition that is about to be hosted.
#[async_trait]
pub trait StoreFactory: Send + Sync + 'static {
    async fn open(
        &self,
        space: &Space,
        partition: &Partition,
        resolver: &RaftResolver,
    ) -> Result<(Arc<dyn RaftNode>, Arc<dyn Engine>), StoreError>;
}

/// Answers which addresses a cluster member can be reached at.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    async fn query_server(&self, node_id: NodeId) -> Result<Replica, GenericError>;
}

/// A partition hosted on this node: its metadata, consensus member and engine.
///
/// Stores are created and destroyed by the server's partition registry only.
pub struct PartitionStore {
    partition: RwLock<Partition>,
    space: RwLock<Space>,
    raft: Arc<dyn RaftNode>,
    engine: Arc<dyn Engine>,
    // serializes schema updates so the version check and the apply are atomic
    update_lock: tokio::sync::Mutex<()>,
}

impl PartitionStore {
    pub(crate) fn new(
        space: Space,
        partition: Partition,
        raft: Arc<dyn RaftNode>,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            partition: RwLock::new(partition),
            space: RwLock::new(space),
            raft,
            engine,
            update_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.partition.read().id
    }

    pub fn partition(&self) -> Partition {
        self.partition.read().clone()
    }

    pub fn space(&self) -> Space {
        self.space.read().clone()
    }

    pub fn version(&self) -> Version {
        self.partition.read().version
    }

    pub fn is_leader(&self) -> bool {
        self.raft.is_leader()
    }

    pub fn leader(&self) -> NodeId {
        self.raft.leader()
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Applies a newer schema version. Versions only ever move forward.
    pub async fn update_space(&self, space: Space) -> Result<(), StoreError> {
        let partition_id = self.id();
        if !self.raft.is_leader() {
            return Err(StoreError::NotLeader(partition_id));
        }

        let _guard = self.update_lock.lock().await;
        let current = self.version();
        if space.version <= current {
            return Err(StoreError::StaleVersion {
                partition_id,
                current,
                incoming: space.version,
            });
        }

        self.engine.update_schema(&space).await?;
        self.partition.write().version = space.version;
        debug!(%partition_id, from = %current, to = %space.version, "Space updated");
        *self.space.write() = space;
        Ok(())
    }

    pub async fn change_member(&self, op: ChangeMemberOp, node_id: NodeId) -> Result<(), StoreError> {
        if !self.raft.is_leader() {
            return Err(StoreError::NotLeader(self.id()));
        }
        self.raft.change_member(op, node_id).await?;
        Ok(())
    }

    pub fn info(&self) -> Result<PartitionInfo, EngineError> {
        let reader = self.engine.reader();
        let doc_num = reader.doc_count()?;
        let size = reader.capacity()?;
        let partition = self.partition.read();
        Ok(PartitionInfo {
            partition_id: partition.id,
            doc_num,
            size,
            path: partition.path.clone(),
            unreachable: self.raft.unreachable(),
            status: partition.status,
            raft_status: self.raft.status(),
            index_status: self.engine.index_status(),
            error: None,
        })
    }

    /// Stops the consensus member and closes the engine. Both are attempted even if the first
    /// fails; the last failure is returned.
    pub(crate) async fn close(&self) -> Result<(), StoreError> {
        let partition_id = {
            let mut partition = self.partition.write();
            partition.status = PartitionStatus::Closed;
            partition.id
        };

        let mut result = Ok(());
        if let Err(err) = self.raft.stop().await {
            warn!(%partition_id, %err, "Failed to stop raft node");
            result = Err(err.into());
        }
        if let Err(err) = self.engine.close().await {
            warn!(%partition_id, %err, "Failed to close engine");
            result = Err(err.into());
        }
        result
    }
}
