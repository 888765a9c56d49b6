// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::PathBuf;

use tessera_core::network::HandlerError;
use tessera_types::errors::GenericError;
use tessera_types::{PartitionId, Version};

/// Failure reported by the consensus member of a partition.
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    #[error("raft node is stopped")]
    Stopped,
    #[error("node {0} is not a member of the raft group")]
    UnknownMember(tessera_types::NodeId),
    #[error(transparent)]
    Other(GenericError),
}

/// Failure reported by the storage and indexing engine of a partition.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine is closed")]
    Closed,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Other(GenericError),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("server is stopping")]
    Stopping,
    #[error("partition:[{0}] already exists")]
    Duplicate(PartitionId),
    #[error("partition:[{0}] is not leader")]
    NotLeader(PartitionId),
    #[error(
        "partition:[{partition_id}] rejects version {incoming}, current version is {current}"
    )]
    StaleVersion {
        partition_id: PartitionId,
        current: Version,
        incoming: Version,
    },
    #[error("cannot prepare partition directory {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Raft(#[from] RaftError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<StoreError> for HandlerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Stopping => HandlerError::ServiceUnavailable,
            StoreError::Duplicate(id) => HandlerError::PartitionDuplicate(id),
            StoreError::NotLeader(id) => HandlerError::NotLeader(id),
            StoreError::StaleVersion {
                partition_id,
                current,
                incoming,
            } => HandlerError::StaleVersion {
                partition_id,
                current,
                incoming,
            },
            StoreError::Engine(EngineError::InvalidRequest(msg)) => HandlerError::BadRequest(msg),
            err => HandlerError::internal(err),
        }
    }
}

impl From<EngineError> for HandlerError {
    fn from(value: EngineError) -> Self {
        StoreError::from(value).into()
    }
}
