// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::DropGuard;

use tessera_types::errors::{codes, StatusCode};
use tessera_types::net::{RequestArg, RpcResult, ServicePath};
use tessera_types::partition::Replica;
use tessera_types::MessageId;

use super::{CallContext, HandlerError};

/// Request as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub message_id: MessageId,
    pub arg: RequestArg,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// One inbound or outbound call. Handlers only ever see this envelope and its response.
#[derive(Debug)]
pub struct RpcRequest {
    pub message_id: MessageId,
    pub arg: RequestArg,
    /// Explicit deadline requested by the caller.
    pub timeout: Option<Duration>,
    ctx: CallContext,
    release: Option<DropGuard>,
}

impl RpcRequest {
    pub fn new(arg: RequestArg) -> Self {
        Self {
            message_id: MessageId::generate(),
            arg,
            timeout: None,
            ctx: CallContext::background(),
            release: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_context(mut self, ctx: CallContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn from_wire(wire: WireRequest, ctx: CallContext) -> Self {
        Self {
            message_id: wire.message_id,
            arg: wire.arg,
            timeout: wire.timeout_ms.map(Duration::from_millis),
            ctx,
            release: None,
        }
    }

    /// Wire form of this request. `default_timeout` applies when the request carries none.
    pub fn to_wire(&self, default_timeout: Option<Duration>) -> WireRequest {
        WireRequest {
            message_id: self.message_id,
            arg: self.arg.clone(),
            timeout_ms: self
                .timeout
                .or(default_timeout)
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    pub fn service_path(&self) -> ServicePath {
        self.arg.service_path()
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Replaces the context of this call. `release` is dropped when the request is resolved.
    pub fn set_context(&mut self, ctx: CallContext, release: Option<DropGuard>) {
        self.ctx = ctx;
        self.release = release;
    }

    /// Releases a context derived for this call. Calling it more than once is harmless.
    pub fn release(&mut self) {
        self.release.take();
    }
}

/// Where a caller should retry a leader-only request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Leader(Replica),
    NoLeader(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("remote call failed with [{status}]: {message}")]
pub struct RemoteError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub message_id: MessageId,
    #[serde(default)]
    pub result: Option<RpcResult>,
    #[serde(default)]
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            result: None,
            status: codes::SUCCESS,
            error: None,
        }
    }

    pub fn failed(message_id: MessageId, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            message_id,
            result: None,
            status,
            error: Some(message.into()),
        }
    }

    pub fn set_result(&mut self, result: RpcResult) {
        self.result = Some(result);
    }

    /// Records `err` as the outcome of the call, discarding any partial result.
    pub fn fail(&mut self, err: &HandlerError) {
        self.result = None;
        self.status = err.code();
        self.error = Some(err.to_string());
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Interprets a leadership status set by the serving partition.
    pub fn leader_redirect(&self) -> Option<Redirect> {
        match self.status {
            codes::PARTITION_NOT_LEADER => self
                .error
                .as_deref()
                .and_then(|descriptor| serde_json::from_str(descriptor).ok())
                .map(Redirect::Leader),
            codes::PARTITION_NO_LEADER => {
                Some(Redirect::NoLeader(self.error.clone().unwrap_or_default()))
            }
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Option<RpcResult>, RemoteError> {
        if self.status.is_success() {
            Ok(self.result)
        } else {
            Err(RemoteError {
                status: self.status,
                message: self.error.unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tessera_types::NodeId;

    #[test]
    fn not_leader_descriptor_is_parsed() {
        let leader = Replica::new(NodeId::new(4), "10.0.0.4:8081");
        let resp = RpcResponse::failed(
            MessageId::generate(),
            codes::PARTITION_NOT_LEADER,
            serde_json::to_string(&leader).unwrap(),
        );
        assert_eq!(Some(Redirect::Leader(leader)), resp.leader_redirect());

        let resp = RpcResponse::failed(
            MessageId::generate(),
            codes::PARTITION_NO_LEADER,
            "partition:[3] no leader",
        );
        assert_eq!(
            Some(Redirect::NoLeader("partition:[3] no leader".to_owned())),
            resp.leader_redirect()
        );
    }

    #[test]
    fn wire_timeout() {
        let req = RpcRequest::new(RequestArg::IsLive);
        assert_eq!(None, req.to_wire(None).timeout_ms);
        assert_eq!(
            Some(1500),
            req.to_wire(Some(Duration::from_millis(1500))).timeout_ms
        );

        let req = req.with_timeout(Duration::from_secs(2));
        let wire = req.to_wire(Some(Duration::from_millis(1500)));
        assert_eq!(Some(2000), wire.timeout_ms);
        let back = RpcRequest::from_wire(wire, CallContext::background());
        assert_eq!(Some(Duration::from_secs(2)), back.timeout);
    }
}
