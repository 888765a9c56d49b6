// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Single node implementations of the consensus, engine and coordinator seams. They back the
//! standalone server and the tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use tessera_types::errors::GenericError;
use tessera_types::partition::{
    ChangeMemberOp, IndexStatus, Partition, RaftStatus, Replica, Space,
};
use tessera_types::query::{
    Document, SearchRequest, SearchResponse, SortValue, SCORE_FIELD,
};
use tessera_types::{NodeId, PartitionId, Version};

use crate::error::{EngineError, RaftError, StoreError};
use crate::resolver::RaftResolver;
use crate::store::{Coordinator, Engine, RaftNode, Reader, StoreFactory};

/// A raft group that lives entirely on this node. The leader can be moved around to simulate
/// elections.
#[derive(Debug)]
pub struct LocalRaft {
    node_id: NodeId,
    leader: AtomicU64,
    members: Mutex<BTreeSet<NodeId>>,
    unreachable: Mutex<Vec<NodeId>>,
    changes: AtomicU64,
    stopped: AtomicBool,
}

impl LocalRaft {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            leader: AtomicU64::new(node_id.as_u64()),
            members: Mutex::new(BTreeSet::from([node_id])),
            unreachable: Mutex::new(Vec::new()),
            changes: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Pass [`NodeId::INVALID`] to simulate an ongoing election.
    pub fn set_leader(&self, leader: NodeId) {
        self.leader.store(leader.as_u64(), Ordering::Release);
    }

    pub fn set_unreachable(&self, nodes: Vec<NodeId>) {
        *self.unreachable.lock() = nodes;
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.members.lock().iter().copied().collect()
    }

    /// Number of membership changes applied so far.
    pub fn change_count(&self) -> u64 {
        self.changes.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RaftNode for LocalRaft {
    fn is_leader(&self) -> bool {
        self.leader() == self.node_id
    }

    fn leader(&self) -> NodeId {
        NodeId::new(self.leader.load(Ordering::Acquire))
    }

    async fn change_member(&self, op: ChangeMemberOp, node_id: NodeId) -> Result<(), RaftError> {
        if self.is_stopped() {
            return Err(RaftError::Stopped);
        }
        let mut members = self.members.lock();
        match op {
            ChangeMemberOp::AddNode => {
                members.insert(node_id);
            }
            ChangeMemberOp::RemoveNode => {
                if !members.remove(&node_id) {
                    return Err(RaftError::UnknownMember(node_id));
                }
            }
        }
        self.changes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn status(&self) -> RaftStatus {
        let index = self.change_count();
        RaftStatus {
            node_id: self.node_id,
            leader: self.leader(),
            term: 1,
            index,
            commit: index,
            applied: index,
            members: self.members(),
        }
    }

    fn unreachable(&self) -> Vec<NodeId> {
        self.unreachable.lock().clone()
    }

    async fn stop(&self) -> Result<(), RaftError> {
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }
}

/// Keeps documents in memory, keyed by id.
///
/// Queries are either `null`, which matches every document, or `{"ids": [..]}`.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    docs: RwLock<BTreeMap<String, Document>>,
    schema_version: RwLock<Option<Version>>,
    closed: AtomicBool,
}

impl MemoryEngine {
    pub fn insert(&self, doc: Document) {
        self.docs.write().insert(doc.id.clone(), doc);
    }

    pub fn schema_version(&self) -> Option<Version> {
        *self.schema_version.read()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

enum Matcher {
    All,
    Ids(BTreeSet<String>),
}

impl Matcher {
    fn parse(query: &Value) -> Result<Self, EngineError> {
        match query {
            Value::Null => Ok(Matcher::All),
            Value::Object(obj) => match obj.get("ids") {
                Some(Value::Array(ids)) => Ok(Matcher::Ids(
                    ids.iter()
                        .filter_map(|id| id.as_str().map(str::to_owned))
                        .collect(),
                )),
                _ => Err(EngineError::InvalidRequest(
                    "query must be null or {\"ids\": [..]}".to_owned(),
                )),
            },
            other => Err(EngineError::InvalidRequest(format!(
                "unsupported query {other}"
            ))),
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        match self {
            Matcher::All => true,
            Matcher::Ids(ids) => ids.contains(&doc.id),
        }
    }
}

fn field_value(doc: &Document, field: &str) -> SortValue {
    if field == SCORE_FIELD {
        return SortValue::Float(doc.score);
    }
    doc.source
        .get(field)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or(SortValue::Null)
}

impl Reader for MemoryEngine {
    fn doc_count(&self) -> Result<u64, EngineError> {
        self.ensure_open()?;
        Ok(self.docs.read().len() as u64)
    }

    fn capacity(&self) -> Result<u64, EngineError> {
        self.ensure_open()?;
        let docs = self.docs.read();
        let mut bytes = 0;
        for doc in docs.values() {
            bytes += serde_json::to_vec(doc)
                .map_err(|err| EngineError::Other(err.into()))?
                .len() as u64;
        }
        Ok(bytes)
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    fn reader(&self) -> &dyn Reader {
        self
    }

    fn index_status(&self) -> IndexStatus {
        if self.docs.read().is_empty() {
            IndexStatus::Uninitialized
        } else {
            IndexStatus::Finished
        }
    }

    async fn update_schema(&self, space: &Space) -> Result<(), EngineError> {
        self.ensure_open()?;
        *self.schema_version.write() = Some(space.version);
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, EngineError> {
        self.ensure_open()?;
        let order = request
            .sort_order()
            .map_err(|err| EngineError::InvalidRequest(err.to_string()))?;
        let matcher = Matcher::parse(&request.query)?;

        let hits: Vec<_> = self
            .docs
            .read()
            .values()
            .filter(|doc| matcher.matches(doc))
            .map(|doc| {
                let values = order
                    .fields()
                    .iter()
                    .map(|field| field_value(doc, &field.field))
                    .collect();
                doc.clone().with_sort_values(values)
            })
            .collect();

        let mut response =
            SearchResponse::new(&request.db_name, &request.space_name).with_hits(hits);
        response.normalize(&order, request.window());
        response.paginate(request.from, request.size);
        Ok(response)
    }

    async fn delete_by_query(&self, request: &SearchRequest) -> Result<u64, EngineError> {
        self.ensure_open()?;
        let matcher = Matcher::parse(&request.query)?;
        let mut docs = self.docs.write();
        let before = docs.len();
        docs.retain(|_, doc| !matcher.matches(doc));
        Ok((before - docs.len()) as u64)
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Opens a [`LocalRaft`] and a [`MemoryEngine`] per partition and keeps handles to both.
#[derive(Debug)]
pub struct LocalStoreFactory {
    node_id: NodeId,
    opened: DashMap<PartitionId, (Arc<LocalRaft>, Arc<MemoryEngine>)>,
}

impl LocalStoreFactory {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            opened: DashMap::new(),
        }
    }

    /// Raft member of the most recently opened store of `id`.
    pub fn raft(&self, id: PartitionId) -> Option<Arc<LocalRaft>> {
        self.opened.get(&id).map(|entry| Arc::clone(&entry.0))
    }

    pub fn engine(&self, id: PartitionId) -> Option<Arc<MemoryEngine>> {
        self.opened.get(&id).map(|entry| Arc::clone(&entry.1))
    }
}

#[async_trait]
impl StoreFactory for LocalStoreFactory {
    async fn open(
        &self,
        _space: &Space,
        partition: &Partition,
        _resolver: &RaftResolver,
    ) -> Result<(Arc<dyn RaftNode>, Arc<dyn Engine>), StoreError> {
        let raft = Arc::new(LocalRaft::new(self.node_id));
        let engine = Arc::new(MemoryEngine::default());
        self.opened
            .insert(partition.id, (Arc::clone(&raft), Arc::clone(&engine)));
        Ok((raft, engine))
    }
}

/// Coordinator that knows a fixed set of cluster members.
#[derive(Debug, Default)]
pub struct StaticCoordinator {
    members: DashMap<NodeId, Replica>,
}

impl StaticCoordinator {
    pub fn new(members: impl IntoIterator<Item = Replica>) -> Self {
        Self {
            members: members
                .into_iter()
                .map(|replica| (replica.node_id, replica))
                .collect(),
        }
    }

    pub fn insert(&self, replica: Replica) {
        self.members.insert(replica.node_id, replica);
    }
}

#[async_trait]
impl Coordinator for StaticCoordinator {
    async fn query_server(&self, node_id: NodeId) -> Result<Replica, GenericError> {
        self.members
            .get(&node_id)
            .map(|replica| replica.clone())
            .ok_or_else(|| format!("node {node_id} is not a known cluster member").into())
    }
}

/// Fails every open, for exercising the create compensation path.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FailingStoreFactory;

#[cfg(test)]
#[async_trait]
impl StoreFactory for FailingStoreFactory {
    async fn open(
        &self,
        _space: &Space,
        _partition: &Partition,
        _resolver: &RaftResolver,
    ) -> Result<(Arc<dyn RaftNode>, Arc<dyn Engine>), StoreError> {
        Err(EngineError::Other("engine refused to open".into()).into())
    }
}

/// Delays each open, then succeeds or fails as scripted. Opens past the end of the script
/// succeed immediately.
#[cfg(test)]
#[derive(Debug)]
pub struct ScriptedStoreFactory {
    local: LocalStoreFactory,
    script: Mutex<std::collections::VecDeque<(std::time::Duration, bool)>>,
}

#[cfg(test)]
impl ScriptedStoreFactory {
    pub fn new(script: impl IntoIterator<Item = (std::time::Duration, bool)>) -> Self {
        Self {
            local: LocalStoreFactory::new(NodeId::new(1)),
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    pub fn local(&self) -> &LocalStoreFactory {
        &self.local
    }
}

#[cfg(test)]
#[async_trait]
impl StoreFactory for ScriptedStoreFactory {
    async fn open(
        &self,
        space: &Space,
        partition: &Partition,
        resolver: &RaftResolver,
    ) -> Result<(Arc<dyn RaftNode>, Arc<dyn Engine>), StoreError> {
        let step = self.script.lock().pop_front();
        let (delay, succeed) = step.unwrap_or((std::time::Duration::ZERO, true));
        tokio::time::sleep(delay).await;
        if succeed {
            self.local.open(space, partition, resolver).await
        } else {
            Err(EngineError::Other("engine refused to open".into()).into())
        }
    }
}
