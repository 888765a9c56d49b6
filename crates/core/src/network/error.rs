// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use tessera_types::errors::{codes, GenericError, StatusCode};
use tessera_types::net::{Endpoint, ServicePath};
use tessera_types::{PartitionId, Version};

use super::ContextError;
use crate::{ShutdownError, TaskError};

/// Failure of a handler in a dispatch chain. Every variant maps onto a response status.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("server is stopping")]
    ServiceUnavailable,
    #[error("partition:[{0}] not exist")]
    PartitionNotExist(PartitionId),
    #[error("partition:[{0}] already exists")]
    PartitionDuplicate(PartitionId),
    #[error("partition:[{0}] is not leader")]
    NotLeader(PartitionId),
    #[error("partition:[{0}] no leader")]
    NoLeader(PartitionId),
    #[error(
        "partition:[{partition_id}] rejects version {incoming}, current version is {current}"
    )]
    StaleVersion {
        partition_id: PartitionId,
        current: Version,
        incoming: Version,
    },
    #[error("handler '{handler}' cannot serve {path}")]
    UnexpectedArgument {
        handler: &'static str,
        path: ServicePath,
    },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("handler '{handler}' panicked: {message}")]
    Panicked {
        handler: &'static str,
        message: String,
    },
    #[error("internal error: {0}")]
    Internal(GenericError),
}

impl HandlerError {
    pub fn internal(err: impl Into<GenericError>) -> Self {
        HandlerError::Internal(err.into())
    }

    pub fn code(&self) -> StatusCode {
        match self {
            HandlerError::ServiceUnavailable => codes::SERVICE_UNAVAILABLE,
            HandlerError::PartitionNotExist(_) => codes::PARTITION_NOT_EXIST,
            HandlerError::PartitionDuplicate(_) => codes::PARTITION_DUPLICATE,
            HandlerError::NotLeader(_) => codes::PARTITION_NOT_LEADER,
            HandlerError::NoLeader(_) => codes::PARTITION_NO_LEADER,
            HandlerError::StaleVersion { .. } => codes::PARTITION_STALE_VERSION,
            HandlerError::UnexpectedArgument { .. } | HandlerError::BadRequest(_) => {
                codes::BAD_REQUEST
            }
            HandlerError::Context(ContextError::DeadlineExceeded) => codes::TIMEOUT,
            HandlerError::Context(ContextError::Cancelled) => codes::SERVICE_UNAVAILABLE,
            HandlerError::Panicked { .. } | HandlerError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connecting to {0} timed out")]
    Timeout(Endpoint),
    #[error("cannot connect to {endpoint}: {source}")]
    Io {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },
    #[error("no server is listening at {0}")]
    UnknownEndpoint(Endpoint),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Transport level failure. These are reported to callers as they are.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    #[error("no address configured")]
    NoAddress,
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("call deadline exceeded")]
    DeadlineExceeded,
    #[error("context cancelled")]
    Cancelled,
    #[error(transparent)]
    ConnectionClosed(#[from] ConnectionClosed),
    #[error("codec error: {0}")]
    Codec(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("stream aborted by receiver: {0}")]
    Aborted(GenericError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl From<ContextError> for NetworkError {
    fn from(value: ContextError) -> Self {
        match value {
            ContextError::Cancelled => NetworkError::Cancelled,
            ContextError::DeadlineExceeded => NetworkError::DeadlineExceeded,
        }
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(value: serde_json::Error) -> Self {
        NetworkError::Codec(value.to_string())
    }
}
