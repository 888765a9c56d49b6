// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use tracing::debug;

use tessera_core::network::{ErrorTransform, HandlerError, RpcRequest, RpcResponse};
use tessera_types::errors::codes;

use crate::handlers::AdminScope;
use crate::server::Server;

/// Turns a not-leader failure into a redirect the caller can follow.
///
/// With a known leader the response carries `PARTITION_NOT_LEADER` and the leader's replica
/// descriptor as JSON in the error message. Without one it carries `PARTITION_NO_LEADER`. Other
/// errors pass through untouched.
pub struct LeaderRedirect {
    server: Server,
}

impl LeaderRedirect {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

impl ErrorTransform<AdminScope> for LeaderRedirect {
    fn transform(
        &self,
        err: HandlerError,
        _req: &RpcRequest,
        resp: &mut RpcResponse,
        scope: &AdminScope,
    ) -> Result<(), HandlerError> {
        let (HandlerError::NotLeader(partition_id), Some(store)) = (&err, scope.store()) else {
            return Err(err);
        };
        let partition_id = *partition_id;

        let leader = store.leader();
        resp.result = None;
        if !leader.is_valid() {
            resp.status = codes::PARTITION_NO_LEADER;
            resp.error = Some(HandlerError::NoLeader(partition_id).to_string());
            return Ok(());
        }

        let Some(replica) = self.server.resolver().to_replica(leader) else {
            return Err(HandlerError::internal(format!(
                "leader {leader} of partition:[{partition_id}] has no known address"
            )));
        };
        let descriptor = serde_json::to_string(&replica).map_err(HandlerError::internal)?;
        debug!(%partition_id, %leader, rpc_addr = %replica.rpc_addr, "Redirecting to leader");
        resp.status = codes::PARTITION_NOT_LEADER;
        resp.error = Some(descriptor);
        Ok(())
    }
}
