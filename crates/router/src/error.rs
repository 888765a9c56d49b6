// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use tessera_core::network::{ContextError, NetworkError, RemoteError};
use tessera_types::errors::{codes, StatusCode};
use tessera_types::query::{MergeError, SearchResponse, SortOrderError};

/// Failure of a routed query. Errors caused by one sender name it.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("sender '{sender}' panicked: {message}")]
    Panicked { sender: String, message: String },
    #[error("sender '{sender}' failed: {source}")]
    Network {
        sender: String,
        #[source]
        source: NetworkError,
    },
    #[error("sender '{sender}' answered [{status}]: {message}")]
    Remote {
        sender: String,
        status: StatusCode,
        message: String,
    },
    #[error("sender '{sender}' answered with an unexpected result")]
    UnexpectedResult { sender: String },
    #[error("merging the result of sender '{sender}' failed: {source}")]
    Merge {
        sender: String,
        #[source]
        source: MergeError,
    },
    #[error(transparent)]
    Sort(#[from] SortOrderError),
    #[error("no senders to query")]
    NoSenders,
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("stream ended without an end marker")]
    StreamClosed,
}

impl QueryError {
    pub(crate) fn remote(sender: impl Into<String>, err: RemoteError) -> Self {
        QueryError::Remote {
            sender: sender.into(),
            status: err.status,
            message: err.message,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            QueryError::Remote { status, .. } => *status,
            QueryError::Network {
                source: NetworkError::DeadlineExceeded,
                ..
            }
            | QueryError::Context(ContextError::DeadlineExceeded) => codes::TIMEOUT,
            QueryError::Context(ContextError::Cancelled) => codes::SERVICE_UNAVAILABLE,
            QueryError::Merge { .. } => codes::MERGE_FAILED,
            QueryError::Sort(_) | QueryError::NoSenders => codes::BAD_REQUEST,
            QueryError::Panicked { .. }
            | QueryError::Network { .. }
            | QueryError::UnexpectedResult { .. }
            | QueryError::StreamClosed => codes::INTERNAL_ERROR,
        }
    }

    /// The failed search response reported to clients for this error.
    pub fn to_response(&self, db_name: &str, space_name: &str) -> SearchResponse {
        SearchResponse::failed(db_name, space_name, self.status(), self.to_string())
    }
}
