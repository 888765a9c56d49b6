// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use tessera_types::net::{Endpoint, ServicePath};

use super::{
    CallContext, ConnectError, ConnectionClosed, ConnectionGuard, Connector, DocSink,
    FrameStream, NetworkError, RpcResponse, RpcServer, StreamFrame, TransportClient, WireRequest,
};

/// In-process transport: routes calls to servers registered under an endpoint name. Requests
/// and responses still pass through their wire encoding.
#[derive(Clone, Default)]
pub struct LocalConnector {
    servers: Arc<DashMap<Endpoint, RpcServer>>,
    connects: Arc<AtomicUsize>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, endpoint: impl Into<Endpoint>, server: RpcServer) {
        self.servers.insert(endpoint.into(), server);
    }

    pub fn deregister(&self, endpoint: &Endpoint) {
        self.servers.remove(endpoint);
    }

    /// Number of connections established so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }
}

impl Connector for LocalConnector {
    type Client = LocalClient;

    async fn connect(&self, endpoint: &Endpoint) -> Result<LocalClient, ConnectError> {
        let server = self
            .servers
            .get(endpoint)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ConnectError::UnknownEndpoint(endpoint.clone()))?;
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(LocalClient {
            endpoint: endpoint.clone(),
            connection: server.connections().track(),
            server,
            broken: false,
        })
    }
}

pub struct LocalClient {
    endpoint: Endpoint,
    server: RpcServer,
    connection: ConnectionGuard,
    broken: bool,
}

fn through_wire<T>(value: &T) -> Result<T, NetworkError>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    Ok(serde_json::from_slice(&serde_json::to_vec(value)?)?)
}

impl TransportClient for LocalClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_healthy(&self) -> bool {
        !self.broken
    }

    async fn call(
        &mut self,
        path: ServicePath,
        request: WireRequest,
    ) -> Result<RpcResponse, NetworkError> {
        let request = through_wire(&request)?;
        // stays set if the call is dropped halfway
        self.broken = true;
        let response = self
            .server
            .dispatch(path, request, CallContext::background())
            .await;
        self.broken = false;
        through_wire(&response)
    }

    async fn open_stream(
        self,
        path: ServicePath,
        request: WireRequest,
    ) -> Result<FrameStream, NetworkError> {
        let request = through_wire(&request)?;
        let (sink, rx) = DocSink::channel(self.server.options().stream_buffer_size);
        let server = self.server.clone();
        let call = tokio::spawn(async move {
            server
                .dispatch_stream(path, request, CallContext::background(), sink)
                .await
        });

        // the connection lives as long as the stream
        let connection = self.connection;
        let end = futures::stream::once(async move {
            let _connection = connection;
            match call.await {
                Ok(response) => Ok(StreamFrame::End(response)),
                Err(_) => Err(NetworkError::from(ConnectionClosed)),
            }
        });
        Ok(ReceiverStream::new(rx)
            .map(|doc| Ok(StreamFrame::Doc(doc)))
            .chain(end)
            .boxed())
    }

    async fn close(self) -> Result<(), NetworkError> {
        Ok(())
    }
}
