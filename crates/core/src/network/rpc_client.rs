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
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::DropGuard;
use tracing::trace;

use tessera_types::errors::GenericError;
use tessera_types::net::Endpoint;
use tessera_types::query::Document;

use super::pool::Discovery;
use super::{
    CallContext, ConnectionClosed, ConnectionPool, Connector, NetworkError, RpcRequest,
    RpcResponse, StreamFrame, TransportClient,
};
use crate::{spawn_isolated, TaskHandle};

/// Client for the partition server rpc surface of one or more equivalent endpoints.
pub struct RpcClient<C: Connector> {
    addresses: Vec<Endpoint>,
    pool: ConnectionPool<C>,
    default_timeout: Option<Duration>,
}

impl<C: Connector> Clone for RpcClient<C> {
    fn clone(&self) -> Self {
        Self {
            addresses: self.addresses.clone(),
            pool: self.pool.clone(),
            default_timeout: self.default_timeout,
        }
    }
}

impl<C: Connector> RpcClient<C> {
    pub fn new<A>(
        connector: Arc<C>,
        addresses: impl IntoIterator<Item = A>,
    ) -> Result<Self, NetworkError>
    where
        A: Into<Endpoint>,
    {
        let addresses: Vec<Endpoint> = addresses.into_iter().map(Into::into).collect();
        let discovery = Discovery::new(addresses.clone())?;
        Ok(Self {
            addresses,
            pool: ConnectionPool::new(connector, discovery),
            default_timeout: None,
        })
    }

    /// Deadline for requests that do not carry their own timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// The `index`-th configured address; all of them joined with `,` for a negative index and
    /// an empty string if `index` is out of range.
    pub fn address(&self, index: isize) -> String {
        match usize::try_from(index) {
            Ok(index) => self
                .addresses
                .get(index)
                .map(ToString::to_string)
                .unwrap_or_default(),
            Err(_) => self
                .addresses
                .iter()
                .map(Endpoint::as_str)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    fn call_context(&self, req: &RpcRequest) -> (CallContext, Option<DropGuard>) {
        match req.timeout.or(self.default_timeout) {
            Some(timeout) => {
                let (ctx, release) = req.context().with_timeout(timeout);
                (ctx, Some(release))
            }
            None => (req.context().clone(), None),
        }
    }

    /// Issues a unary call on a pooled client. The client goes back to the pool whatever the
    /// outcome; transport errors are returned as they are.
    pub async fn execute(&self, req: &RpcRequest) -> Result<RpcResponse, NetworkError> {
        let path = req.service_path();
        let (ctx, _release) = self.call_context(req);
        let mut client = ctx.run(self.pool.checkout()).await??;
        trace!(%path, message_id = %req.message_id, endpoint = %client.endpoint(), "Executing");
        ctx.run(client.call(path, req.to_wire(self.default_timeout)))
            .await?
    }

    /// Like [`Self::execute`] but does not wait for the response. Acquiring the client happens
    /// before this returns.
    pub async fn go_execute(&self, req: RpcRequest) -> Result<CallHandle, NetworkError> {
        let path = req.service_path();
        let (ctx, release) = self.call_context(&req);
        let mut client = ctx.run(self.pool.checkout()).await??;
        let wire = req.to_wire(self.default_timeout);

        let handle = spawn_isolated("go-execute", async move {
            let _release = release;
            match ctx.run(client.call(path, wire)).await {
                Ok(result) => result,
                Err(err) => Err(err.into()),
            }
        });
        Ok(CallHandle(handle))
    }

    /// Issues a streaming call on a dedicated connection and hands every document to
    /// `on_message`. Returns the final response once the server ends the stream.
    ///
    /// The call stops early if `on_message` fails or the request's context ends; the connection
    /// is released on every path.
    pub async fn stream_execute<F, Fut>(
        &self,
        req: &RpcRequest,
        mut on_message: F,
    ) -> Result<RpcResponse, NetworkError>
    where
        F: FnMut(Document) -> Fut + Send,
        Fut: Future<Output = Result<(), GenericError>> + Send,
    {
        let path = req.service_path();
        let (ctx, _release) = self.call_context(req);
        let client = ctx.run(self.pool.connect()).await??;
        let mut frames = ctx
            .run(client.open_stream(path, req.to_wire(self.default_timeout)))
            .await??;

        loop {
            let frame = tokio::select! {
                biased;
                err = ctx.done() => return Err(err.into()),
                frame = frames.next() => frame,
            };
            match frame {
                Some(Ok(StreamFrame::Doc(doc))) => {
                    ctx.run(on_message(doc))
                        .await?
                        .map_err(NetworkError::Aborted)?;
                }
                Some(Ok(StreamFrame::End(response))) => return Ok(response),
                Some(Err(err)) => return Err(err),
                None => return Err(ConnectionClosed.into()),
            }
        }
    }

    /// Closes all pooled clients, returning the last close failure.
    pub async fn close(&self) -> Result<(), NetworkError> {
        self.pool.close().await
    }
}

/// Pending response of [`RpcClient::go_execute`].
pub struct CallHandle(TaskHandle<Result<RpcResponse, NetworkError>>);

impl CallHandle {
    pub fn abort(&self) {
        self.0.abort();
    }
}

impl Future for CallHandle {
    type Output = Result<RpcResponse, NetworkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(Pin::new(&mut self.0).poll(cx));
        Poll::Ready(result.map_err(NetworkError::from).and_then(|r| r))
    }
}
