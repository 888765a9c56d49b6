// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::future::Future;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use tessera_types::net::{Endpoint, ServicePath};
use tessera_types::query::Document;

use super::{ConnectError, NetworkError, RpcResponse, WireRequest};

/// Item of a streaming response. A stream always finishes with exactly one `End` carrying the
/// final response of the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamFrame {
    Doc(Document),
    End(RpcResponse),
}

pub type FrameStream = BoxStream<'static, Result<StreamFrame, NetworkError>>;

/// Establishes client connections to endpoints.
pub trait Connector: Send + Sync + 'static {
    type Client: TransportClient;

    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Client, ConnectError>> + Send;
}

/// A client connection. A client serves one call at a time.
pub trait TransportClient: Send + Sync + 'static {
    fn endpoint(&self) -> &Endpoint;

    /// Whether the client can take another call. A client whose last call was interrupted is
    /// not healthy anymore.
    fn is_healthy(&self) -> bool;

    fn call(
        &mut self,
        path: ServicePath,
        request: WireRequest,
    ) -> impl Future<Output = Result<RpcResponse, NetworkError>> + Send;

    /// Starts a streaming call. The connection is owned by the returned stream.
    fn open_stream(
        self,
        path: ServicePath,
        request: WireRequest,
    ) -> impl Future<Output = Result<FrameStream, NetworkError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), NetworkError>> + Send;
}
