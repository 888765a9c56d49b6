// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Topology model: spaces, partitions, replicas and the reports the partition server produces
//! about them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::identifiers::{NodeId, PartitionId, Version};

/// Schema and topology metadata of a collection. Owned by the coordinator and propagated to the
/// partitions hosting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub db_name: String,
    pub name: String,
    pub version: Version,
    pub partition_num: u32,
    pub replica_num: u8,
    /// Field definitions as understood by the storage engine.
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl Space {
    pub fn new(db_name: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            db_name: db_name.into(),
            name: name.into(),
            version,
            partition_num: 1,
            replica_num: 1,
            properties: serde_json::Value::Null,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.db_name, self.name)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PartitionStatus {
    #[default]
    Active,
    Closed,
    Error,
}

/// A shard of a space as hosted on this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub db_name: String,
    pub space_name: String,
    pub path: PathBuf,
    pub status: PartitionStatus,
    pub version: Version,
}

impl Partition {
    pub fn new(id: PartitionId, space: &Space, path: PathBuf) -> Self {
        Self {
            id,
            db_name: space.db_name.clone(),
            space_name: space.name.clone(),
            path,
            status: PartitionStatus::Active,
            version: space.version,
        }
    }
}

/// Network addresses of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replica {
    pub node_id: NodeId,
    pub rpc_addr: String,
    #[serde(default)]
    pub heartbeat_addr: String,
    #[serde(default)]
    pub replicate_addr: String,
}

impl Replica {
    pub fn new(node_id: NodeId, rpc_addr: impl Into<String>) -> Self {
        Self {
            node_id,
            rpc_addr: rpc_addr.into(),
            heartbeat_addr: String::new(),
            replicate_addr: String::new(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ChangeMemberOp {
    AddNode,
    RemoveNode,
}

/// A membership mutation of a partition's consensus group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMember {
    pub partition_id: PartitionId,
    pub node_id: NodeId,
    pub method: ChangeMemberOp,
}

/// Consensus view of a partition as reported by the local replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftStatus {
    pub node_id: NodeId,
    pub leader: NodeId,
    pub term: u64,
    pub index: u64,
    pub commit: u64,
    pub applied: u64,
    #[serde(default)]
    pub members: Vec<NodeId>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum IndexStatus {
    #[default]
    Uninitialized,
    Indexing,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub partition_id: PartitionId,
    pub doc_num: u64,
    pub size: u64,
    pub path: PathBuf,
    #[serde(default)]
    pub unreachable: Vec<NodeId>,
    pub status: PartitionStatus,
    pub raft_status: RaftStatus,
    pub index_status: IndexStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PartitionInfo {
    pub fn empty(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub active_connections: usize,
    pub partition_infos: Vec<PartitionInfo>,
}
