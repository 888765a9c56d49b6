// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Control plane handlers of the partition server.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use enumset::{enum_set, EnumSet};
use tracing::error;

use tessera_core::network::{ConnectionCounter, Handler, HandlerError, RpcRequest, RpcResponse};
use tessera_core::panic_message;
use tessera_types::net::{RequestArg, RpcResult, ServicePath};
use tessera_types::partition::{ChangeMemberOp, PartitionInfo, ServerStats};
use tessera_types::PartitionId;

use crate::server::Server;
use crate::store::PartitionStore;

/// Per-call state shared by the handlers of one chain.
#[derive(Default)]
pub struct AdminScope {
    store: Option<Arc<PartitionStore>>,
}

impl AdminScope {
    pub fn store(&self) -> Option<&Arc<PartitionStore>> {
        self.store.as_ref()
    }

    pub(crate) fn require_store(
        &self,
        handler: &'static str,
    ) -> Result<&Arc<PartitionStore>, HandlerError> {
        self.store.as_ref().ok_or_else(|| {
            HandlerError::internal(format!(
                "handler '{handler}' runs before the partition store is resolved"
            ))
        })
    }
}

pub(crate) fn unexpected(handler: &'static str, req: &RpcRequest) -> HandlerError {
    HandlerError::UnexpectedArgument {
        handler,
        path: req.service_path(),
    }
}

/// Looks up the partition a request addresses and binds it to the scope.
pub struct StoreResolutionHandler {
    server: Server,
}

impl StoreResolutionHandler {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Handler<AdminScope> for StoreResolutionHandler {
    fn name(&self) -> &'static str {
        "store-resolution"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(
            ServicePath::UpdatePartition
                | ServicePath::ChangeMember
                | ServicePath::Search
                | ServicePath::MSearch
                | ServicePath::DeleteByQuery
        )
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        _resp: &mut RpcResponse,
        scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        let partition_id = req.arg.partition_id().ok_or_else(|| {
            HandlerError::BadRequest(format!("{} request names no partition", req.service_path()))
        })?;
        let store = self
            .server
            .get_partition(partition_id)
            .ok_or(HandlerError::PartitionNotExist(partition_id))?;
        scope.store = Some(store);
        Ok(())
    }
}

pub struct CreatePartitionHandler {
    server: Server,
}

impl CreatePartitionHandler {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Handler<AdminScope> for CreatePartitionHandler {
    fn name(&self) -> &'static str {
        "create-partition"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(ServicePath::CreatePartition)
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        resp: &mut RpcResponse,
        _scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        let RequestArg::CreatePartition {
            space,
            partition_id,
        } = &req.arg
        else {
            return Err(unexpected(self.name(), req));
        };
        self.server.create_partition(space, *partition_id).await?;
        resp.set_result(RpcResult::Ack);
        Ok(())
    }
}

pub struct DeletePartitionHandler {
    server: Server,
}

impl DeletePartitionHandler {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Handler<AdminScope> for DeletePartitionHandler {
    fn name(&self) -> &'static str {
        "delete-partition"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(ServicePath::DeletePartition)
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        resp: &mut RpcResponse,
        _scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        let RequestArg::DeletePartition { partition_id } = req.arg else {
            return Err(unexpected(self.name(), req));
        };
        self.server.delete_partition(partition_id).await;
        resp.set_result(RpcResult::Ack);
        Ok(())
    }
}

pub struct DeleteReplicaHandler {
    server: Server,
}

impl DeleteReplicaHandler {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Handler<AdminScope> for DeleteReplicaHandler {
    fn name(&self) -> &'static str {
        "delete-replica"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(ServicePath::DeleteReplica)
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        resp: &mut RpcResponse,
        _scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        let RequestArg::DeleteReplica { partition_id } = req.arg else {
            return Err(unexpected(self.name(), req));
        };
        self.server.delete_replica(partition_id).await;
        resp.set_result(RpcResult::Ack);
        Ok(())
    }
}

pub struct UpdatePartitionHandler;

#[async_trait]
impl Handler<AdminScope> for UpdatePartitionHandler {
    fn name(&self) -> &'static str {
        "update-partition"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(ServicePath::UpdatePartition)
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        resp: &mut RpcResponse,
        scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        let RequestArg::UpdatePartition { space, .. } = &req.arg else {
            return Err(unexpected(self.name(), req));
        };
        let store = scope.require_store(self.name())?;
        store.update_space(space.clone()).await?;
        resp.set_result(RpcResult::Ack);
        Ok(())
    }
}

/// Reports every hosted partition plus the number of open connections. Reading one partition
/// failing, or panicking, only marks that partition's entry.
pub struct StatsHandler {
    server: Server,
    connections: ConnectionCounter,
}

impl StatsHandler {
    pub fn new(server: Server, connections: ConnectionCounter) -> Self {
        Self {
            server,
            connections,
        }
    }
}

fn read_info(store: &PartitionStore) -> PartitionInfo {
    let partition_id = store.id();
    match catch_unwind(AssertUnwindSafe(|| store.info())) {
        Ok(Ok(info)) => info,
        Ok(Err(err)) => PartitionInfo {
            error: Some(format!("cannot read partition from engine: {err}")),
            ..PartitionInfo::empty(partition_id)
        },
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(%partition_id, %message, "Reading partition stats panicked");
            PartitionInfo {
                error: Some(format!("reading partition panicked: {message}")),
                ..PartitionInfo::empty(partition_id)
            }
        }
    }
}

#[async_trait]
impl Handler<AdminScope> for StatsHandler {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(ServicePath::Stats)
    }

    async fn execute(
        &self,
        _req: &mut RpcRequest,
        resp: &mut RpcResponse,
        _scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        let partition_infos = self
            .server
            .registry()
            .snapshot()
            .iter()
            .map(|store| read_info(store))
            .collect();
        resp.set_result(RpcResult::Stats(ServerStats {
            active_connections: self.connections.get(),
            partition_infos,
        }));
        Ok(())
    }
}

pub struct IsLiveHandler;

#[async_trait]
impl Handler<AdminScope> for IsLiveHandler {
    fn name(&self) -> &'static str {
        "is-live"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(ServicePath::IsLive)
    }

    async fn execute(
        &self,
        _req: &mut RpcRequest,
        resp: &mut RpcResponse,
        _scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        resp.set_result(RpcResult::Live(true));
        Ok(())
    }
}

pub struct PartitionInfoHandler {
    server: Server,
}

impl PartitionInfoHandler {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Handler<AdminScope> for PartitionInfoHandler {
    fn name(&self) -> &'static str {
        "partition-info"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(ServicePath::PartitionInfo)
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        resp: &mut RpcResponse,
        _scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        let RequestArg::PartitionInfo { partition_id } = req.arg else {
            return Err(unexpected(self.name(), req));
        };
        let stores = match partition_id {
            None | Some(PartitionId::ALL) => self.server.registry().snapshot(),
            Some(id) => vec![self
                .server
                .get_partition(id)
                .ok_or(HandlerError::PartitionNotExist(id))?],
        };

        let infos = stores
            .iter()
            .map(|store| store.info().map_err(HandlerError::from))
            .collect::<Result<Vec<_>, _>>()?;
        resp.set_result(RpcResult::PartitionInfos(infos));
        Ok(())
    }
}

/// Adds or removes a raft member of a partition. Only the leader accepts membership changes.
pub struct ChangeMemberHandler {
    server: Server,
}

impl ChangeMemberHandler {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Handler<AdminScope> for ChangeMemberHandler {
    fn name(&self) -> &'static str {
        "change-member"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(ServicePath::ChangeMember)
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        resp: &mut RpcResponse,
        scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        let RequestArg::ChangeMember(change) = &req.arg else {
            return Err(unexpected(self.name(), req));
        };
        let store = scope.require_store(self.name())?;
        if !store.is_leader() {
            return Err(HandlerError::NotLeader(store.id()));
        }

        let replica = self
            .server
            .coordinator()
            .query_server(change.node_id)
            .await
            .map_err(|err| {
                error!(node_id = %change.node_id, %err, "Cannot look up cluster member");
                HandlerError::Internal(err)
            })?;

        if change.method == ChangeMemberOp::AddNode {
            self.server.resolver().add_node(replica);
        }
        store.change_member(change.method, change.node_id).await?;
        if change.method == ChangeMemberOp::RemoveNode {
            self.server.resolver().delete_node(change.node_id);
        }

        resp.set_result(RpcResult::Ack);
        Ok(())
    }
}
