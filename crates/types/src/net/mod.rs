// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Service paths and request/response payloads exchanged between the router and the partition
//! servers.

use std::fmt;

use enumset::EnumSetType;
use serde::{Deserialize, Serialize};

use crate::partition::{ChangeMember, PartitionInfo, ServerStats, Space};
use crate::query::{DeleteByQueryResponse, SearchRequest, SearchResponse, SearchResponses};
use crate::PartitionId;

/// Names an operation exposed by a partition server.
#[derive(
    Debug, Hash, EnumSetType, Serialize, Deserialize, strum::IntoStaticStr, strum::Display,
)]
pub enum ServicePath {
    CreatePartition,
    DeletePartition,
    DeleteReplica,
    UpdatePartition,
    Stats,
    IsLive,
    PartitionInfo,
    ChangeMember,
    Search,
    MSearch,
    DeleteByQuery,
    StreamSearch,
}

impl ServicePath {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Network address of a partition server, `host:port`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Endpoint(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(value: &str) -> Self {
        Endpoint(value.to_owned())
    }
}

impl From<String> for Endpoint {
    fn from(value: String) -> Self {
        Endpoint(value)
    }
}

/// Typed argument of a request. Every variant belongs to exactly one [`ServicePath`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "arg")]
pub enum RequestArg {
    CreatePartition {
        space: Space,
        partition_id: PartitionId,
    },
    DeletePartition {
        partition_id: PartitionId,
    },
    DeleteReplica {
        partition_id: PartitionId,
    },
    UpdatePartition {
        partition_id: PartitionId,
        space: Space,
    },
    Stats,
    IsLive,
    /// `None` asks for all partitions hosted by the server.
    PartitionInfo {
        partition_id: Option<PartitionId>,
    },
    ChangeMember(ChangeMember),
    Search(SearchRequest),
    MSearch(Vec<SearchRequest>),
    DeleteByQuery(SearchRequest),
    StreamSearch(SearchRequest),
}

impl RequestArg {
    pub fn service_path(&self) -> ServicePath {
        match self {
            RequestArg::CreatePartition { .. } => ServicePath::CreatePartition,
            RequestArg::DeletePartition { .. } => ServicePath::DeletePartition,
            RequestArg::DeleteReplica { .. } => ServicePath::DeleteReplica,
            RequestArg::UpdatePartition { .. } => ServicePath::UpdatePartition,
            RequestArg::Stats => ServicePath::Stats,
            RequestArg::IsLive => ServicePath::IsLive,
            RequestArg::PartitionInfo { .. } => ServicePath::PartitionInfo,
            RequestArg::ChangeMember(_) => ServicePath::ChangeMember,
            RequestArg::Search(_) => ServicePath::Search,
            RequestArg::MSearch(_) => ServicePath::MSearch,
            RequestArg::DeleteByQuery(_) => ServicePath::DeleteByQuery,
            RequestArg::StreamSearch(_) => ServicePath::StreamSearch,
        }
    }

    /// The partition this request is addressed to, if it targets a single partition.
    pub fn partition_id(&self) -> Option<PartitionId> {
        match self {
            RequestArg::CreatePartition { partition_id, .. }
            | RequestArg::DeletePartition { partition_id }
            | RequestArg::DeleteReplica { partition_id }
            | RequestArg::UpdatePartition { partition_id, .. } => Some(*partition_id),
            RequestArg::PartitionInfo { partition_id } => *partition_id,
            RequestArg::ChangeMember(change) => Some(change.partition_id),
            RequestArg::Search(request)
            | RequestArg::DeleteByQuery(request)
            | RequestArg::StreamSearch(request) => request.partition_id,
            RequestArg::MSearch(requests) => requests.first().and_then(|r| r.partition_id),
            RequestArg::Stats | RequestArg::IsLive => None,
        }
    }
}

/// Successful payload of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "result")]
pub enum RpcResult {
    Ack,
    Live(bool),
    PartitionInfos(Vec<PartitionInfo>),
    Stats(ServerStats),
    Search(SearchResponse),
    MSearch(SearchResponses),
    DeleteByQuery(DeleteByQueryResponse),
}
