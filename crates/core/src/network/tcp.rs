// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Length delimited json frames over TCP.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use tessera_types::config::NetworkingOptions;
use tessera_types::net::{Endpoint, ServicePath};

use super::{
    CallContext, ConnectError, ConnectionClosed, Connector, DocSink, FrameStream, NetworkError,
    RpcResponse, RpcServer, StreamFrame, TransportClient, WireRequest,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Request {
        path: ServicePath,
        stream: bool,
        request: WireRequest,
    },
    Response(RpcResponse),
    Stream(StreamFrame),
}

impl Frame {
    fn kind(&self) -> &'static str {
        match self {
            Frame::Request { .. } => "request",
            Frame::Response(_) => "response",
            Frame::Stream(_) => "stream",
        }
    }
}

pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_length)
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, NetworkError> {
        match self.inner.decode(src)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), NetworkError> {
        let bytes = serde_json::to_vec(&item)?;
        self.inner.encode(Bytes::from(bytes), dst)?;
        Ok(())
    }
}

type FramedStream = Framed<TcpStream, FrameCodec>;

#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    message_size_limit: usize,
}

impl TcpConnector {
    pub fn new(options: &NetworkingOptions) -> Self {
        Self {
            connect_timeout: options.connect_timeout(),
            message_size_limit: options.message_size_limit,
        }
    }
}

impl Connector for TcpConnector {
    type Client = TcpClient;

    async fn connect(&self, endpoint: &Endpoint) -> Result<TcpClient, ConnectError> {
        let stream =
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint.as_str()))
                .await
                .map_err(|_| ConnectError::Timeout(endpoint.clone()))?
                .map_err(|source| ConnectError::Io {
                    endpoint: endpoint.clone(),
                    source,
                })?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%endpoint, %err, "Cannot disable nagle");
        }

        debug!(%endpoint, "Connected");
        Ok(TcpClient {
            endpoint: endpoint.clone(),
            framed: Framed::new(stream, FrameCodec::new(self.message_size_limit)),
            broken: false,
        })
    }
}

pub struct TcpClient {
    endpoint: Endpoint,
    framed: FramedStream,
    broken: bool,
}

impl TransportClient for TcpClient {
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
        // stays set unless a complete response was read
        self.broken = true;
        let message_id = request.message_id;
        self.framed
            .send(Frame::Request {
                path,
                stream: false,
                request,
            })
            .await?;

        match self.framed.next().await {
            Some(Ok(Frame::Response(response))) if response.message_id == message_id => {
                self.broken = false;
                Ok(response)
            }
            Some(Ok(Frame::Response(response))) => Err(NetworkError::Protocol(format!(
                "response {} does not answer request {}",
                response.message_id, message_id
            ))),
            Some(Ok(other)) => Err(NetworkError::Protocol(format!(
                "expected a response, got a {} frame",
                other.kind()
            ))),
            Some(Err(err)) => Err(err),
            None => Err(ConnectionClosed.into()),
        }
    }

    async fn open_stream(
        mut self,
        path: ServicePath,
        request: WireRequest,
    ) -> Result<FrameStream, NetworkError> {
        self.framed
            .send(Frame::Request {
                path,
                stream: true,
                request,
            })
            .await?;

        Ok(self
            .framed
            .map(|frame| match frame {
                Ok(Frame::Stream(frame)) => Ok(frame),
                Ok(other) => Err(NetworkError::Protocol(format!(
                    "expected a stream frame, got a {} frame",
                    other.kind()
                ))),
                Err(err) => Err(err),
            })
            .boxed())
    }

    async fn close(mut self) -> Result<(), NetworkError> {
        self.framed.close().await
    }
}

impl RpcServer {
    /// Accepts connections on `listener` until `cancel` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), NetworkError> {
        if let Ok(address) = listener.local_addr() {
            info!(%address, "Rpc server listening");
        }

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Rpc server stopped accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(%err, "Failed to accept connection");
                    continue;
                }
            };

            let server = self.clone();
            let cancel = cancel.child_token();
            tokio::spawn(
                async move {
                    if let Err(err) = server.handle_connection(stream, cancel).await {
                        debug!(%err, "Connection terminated");
                    }
                }
                .instrument(tracing::debug_span!("rpc-connection", %peer)),
            );
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        cancel: CancellationToken,
    ) -> Result<(), NetworkError> {
        let _connection = self.connections().track();
        let _ = stream.set_nodelay(true);
        let mut framed = Framed::new(stream, FrameCodec::new(self.options().message_size_limit));

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = framed.next() => frame,
            };
            let Some(frame) = frame else {
                return Ok(());
            };

            let ctx = CallContext::with_cancellation(cancel.child_token());
            match frame? {
                Frame::Request {
                    path,
                    stream: false,
                    request,
                } => {
                    let response = self.dispatch(path, request, ctx).await;
                    framed.send(Frame::Response(response)).await?;
                }
                Frame::Request {
                    path,
                    stream: true,
                    request,
                } => {
                    self.serve_stream(&mut framed, path, request, ctx).await?;
                }
                other => {
                    return Err(NetworkError::Protocol(format!(
                        "expected a request, got a {} frame",
                        other.kind()
                    )))
                }
            }
        }
    }

    async fn serve_stream(
        &self,
        framed: &mut FramedStream,
        path: ServicePath,
        request: WireRequest,
        ctx: CallContext,
    ) -> Result<(), NetworkError> {
        let (sink, mut docs) = DocSink::channel(self.options().stream_buffer_size);
        let call = self.dispatch_stream(path, request, ctx.clone(), sink);
        tokio::pin!(call);

        let response = loop {
            tokio::select! {
                response = &mut call => break response,
                Some(doc) = docs.recv() => {
                    if let Err(err) = framed.send(Frame::Stream(StreamFrame::Doc(doc))).await {
                        // the producer must not wait for a receiver that is gone
                        ctx.cancel();
                        return Err(err);
                    }
                }
            }
        };

        while let Ok(doc) = docs.try_recv() {
            framed.send(Frame::Stream(StreamFrame::Doc(doc))).await?;
        }
        framed
            .send(Frame::Stream(StreamFrame::End(response)))
            .await
    }
}
