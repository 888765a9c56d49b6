// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use tessera_types::config::NetworkingOptions;
use tessera_types::errors::codes;
use tessera_types::net::ServicePath;
use tessera_types::query::Document;

use super::{CallContext, Chain, ConnectionClosed, RpcRequest, RpcResponse, WireRequest};

/// A unary operation of the rpc server.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn call(&self, req: RpcRequest) -> RpcResponse;
}

#[async_trait]
impl<S: Default + Send + 'static> Service for Chain<S> {
    async fn call(&self, req: RpcRequest) -> RpcResponse {
        self.execute(req).await
    }
}

/// A streaming operation. Documents go to `sink`; the returned response ends the stream.
#[async_trait]
pub trait StreamService: Send + Sync + 'static {
    async fn call(&self, req: RpcRequest, sink: DocSink) -> RpcResponse;
}

/// Sending half of a streaming response.
#[derive(Debug, Clone)]
pub struct DocSink {
    tx: mpsc::Sender<Document>,
}

impl DocSink {
    pub fn channel(buffer: usize) -> (DocSink, mpsc::Receiver<Document>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (DocSink { tx }, rx)
    }

    /// Fails once the receiving side went away.
    pub async fn send(&self, doc: Document) -> Result<(), ConnectionClosed> {
        self.tx.send(doc).await.map_err(|_| ConnectionClosed)
    }
}

/// Counts the connections a server currently holds.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCounter(Arc<AtomicUsize>);

impl ConnectionCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    pub fn track(&self) -> ConnectionGuard {
        self.0.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard(self.0.clone())
    }
}

#[derive(Debug)]
pub struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct RpcServerBuilder {
    options: NetworkingOptions,
    unary: HashMap<ServicePath, Arc<dyn Service>>,
    streams: HashMap<ServicePath, Arc<dyn StreamService>>,
    connections: ConnectionCounter,
}

impl RpcServerBuilder {
    pub fn new(options: NetworkingOptions) -> Self {
        Self {
            options,
            unary: HashMap::new(),
            streams: HashMap::new(),
            connections: ConnectionCounter::default(),
        }
    }

    /// Connection counter of the server being built.
    pub fn connections(&self) -> ConnectionCounter {
        self.connections.clone()
    }

    #[track_caller]
    pub fn register<S: Service>(&mut self, path: ServicePath, service: S) {
        self.assert_unregistered(path);
        self.unary.insert(path, Arc::new(service));
    }

    #[track_caller]
    pub fn register_chain<S: Default + Send + 'static>(&mut self, chain: Chain<S>) {
        self.register(chain.path(), chain);
    }

    #[track_caller]
    pub fn register_stream<S: StreamService>(&mut self, path: ServicePath, service: S) {
        self.assert_unregistered(path);
        self.streams.insert(path, Arc::new(service));
    }

    #[track_caller]
    fn assert_unregistered(&self, path: ServicePath) {
        if self.unary.contains_key(&path) || self.streams.contains_key(&path) {
            panic!("Service for path {} has been registered already!", path);
        }
    }

    pub fn build(self) -> RpcServer {
        RpcServer {
            inner: Arc::new(ServerInner {
                options: self.options,
                unary: self.unary,
                streams: self.streams,
                connections: self.connections,
            }),
        }
    }
}

struct ServerInner {
    options: NetworkingOptions,
    unary: HashMap<ServicePath, Arc<dyn Service>>,
    streams: HashMap<ServicePath, Arc<dyn StreamService>>,
    connections: ConnectionCounter,
}

/// Routes requests to the services registered for their path.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

impl RpcServer {
    pub fn options(&self) -> &NetworkingOptions {
        &self.inner.options
    }

    pub fn connections(&self) -> &ConnectionCounter {
        &self.inner.connections
    }

    pub async fn dispatch(
        &self,
        path: ServicePath,
        wire: WireRequest,
        ctx: CallContext,
    ) -> RpcResponse {
        if let Err(resp) = check_path(path, &wire) {
            return resp;
        }
        let Some(service) = self.inner.unary.get(&path).cloned() else {
            debug!(%path, "No unary service registered");
            return RpcResponse::failed(
                wire.message_id,
                codes::BAD_REQUEST,
                format!("no service registered for {path}"),
            );
        };

        trace!(%path, message_id = %wire.message_id, "Dispatching request");
        service.call(RpcRequest::from_wire(wire, ctx)).await
    }

    pub async fn dispatch_stream(
        &self,
        path: ServicePath,
        wire: WireRequest,
        ctx: CallContext,
        sink: DocSink,
    ) -> RpcResponse {
        if let Err(resp) = check_path(path, &wire) {
            return resp;
        }
        let Some(service) = self.inner.streams.get(&path).cloned() else {
            debug!(%path, "No stream service registered");
            return RpcResponse::failed(
                wire.message_id,
                codes::BAD_REQUEST,
                format!("no stream service registered for {path}"),
            );
        };

        trace!(%path, message_id = %wire.message_id, "Dispatching stream request");
        service.call(RpcRequest::from_wire(wire, ctx), sink).await
    }
}

fn check_path(path: ServicePath, wire: &WireRequest) -> Result<(), RpcResponse> {
    let expected = wire.arg.service_path();
    if expected == path {
        Ok(())
    } else {
        Err(RpcResponse::failed(
            wire.message_id,
            codes::BAD_REQUEST,
            format!("argument for {expected} sent to {path}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tessera_types::net::{RequestArg, RpcResult};
    use tessera_types::MessageId;

    struct Live;

    #[async_trait]
    impl Service for Live {
        async fn call(&self, req: RpcRequest) -> RpcResponse {
            let mut resp = RpcResponse::new(req.message_id);
            resp.set_result(RpcResult::Live(true));
            resp
        }
    }

    fn wire(arg: RequestArg) -> WireRequest {
        WireRequest {
            message_id: MessageId::generate(),
            arg,
            timeout_ms: None,
        }
    }

    #[test_log::test(tokio::test)]
    async fn routes_by_path() {
        let mut builder = RpcServerBuilder::new(NetworkingOptions::default());
        builder.register(ServicePath::IsLive, Live);
        let server = builder.build();

        let resp = server
            .dispatch(
                ServicePath::IsLive,
                wire(RequestArg::IsLive),
                CallContext::background(),
            )
            .await;
        assert_eq!(Some(RpcResult::Live(true)), resp.result);

        let resp = server
            .dispatch(
                ServicePath::Stats,
                wire(RequestArg::Stats),
                CallContext::background(),
            )
            .await;
        assert_eq!(codes::BAD_REQUEST, resp.status);

        // argument and path disagree
        let resp = server
            .dispatch(
                ServicePath::IsLive,
                wire(RequestArg::Stats),
                CallContext::background(),
            )
            .await;
        assert_eq!(codes::BAD_REQUEST, resp.status);
    }

    #[test]
    #[should_panic(expected = "registered already")]
    fn duplicate_registration_panics() {
        let mut builder = RpcServerBuilder::new(NetworkingOptions::default());
        builder.register(ServicePath::IsLive, Live);
        builder.register(ServicePath::IsLive, Live);
    }

    #[test]
    fn connection_guard_decrements() {
        let counter = ConnectionCounter::default();
        let a = counter.track();
        let b = counter.track();
        assert_eq!(2, counter.get());
        drop(a);
        drop(b);
        assert_eq!(0, counter.get());
    }
}
