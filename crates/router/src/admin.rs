// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use tessera_core::network::{
    Connector, NetworkError, Redirect, RemoteError, RpcClient, RpcRequest,
};
use tessera_types::config::{NetworkingOptions, RouterOptions};
use tessera_types::net::{Endpoint, RequestArg, RpcResult, ServicePath};
use tessera_types::partition::{ChangeMember, PartitionInfo, ServerStats, Space};
use tessera_types::PartitionId;

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("{0}")]
    NoLeader(String),
    #[error("gave up after {redirects} leader redirects, last leader was {leader}")]
    TooManyRedirects { redirects: u32, leader: Endpoint },
    #[error("{0} answered with an unexpected result")]
    UnexpectedResult(ServicePath),
}

/// Typed client for the control plane of partition servers. Leader-only calls answered by a
/// follower are retried at the leader the follower names.
pub struct AdminClient<C: Connector> {
    connector: Arc<C>,
    clients: DashMap<Endpoint, RpcClient<C>>,
    max_redirects: u32,
    request_timeout: Duration,
}

impl<C: Connector> AdminClient<C> {
    pub fn new(
        connector: Arc<C>,
        networking: &NetworkingOptions,
        router: &RouterOptions,
    ) -> Self {
        Self {
            connector,
            clients: DashMap::new(),
            max_redirects: router.max_redirects,
            request_timeout: networking.request_timeout(),
        }
    }

    fn client(&self, endpoint: &Endpoint) -> Result<RpcClient<C>, NetworkError> {
        if let Some(client) = self.clients.get(endpoint) {
            return Ok(client.clone());
        }
        let client = RpcClient::new(Arc::clone(&self.connector), [endpoint.clone()])?
            .with_default_timeout(self.request_timeout);
        Ok(self
            .clients
            .entry(endpoint.clone())
            .or_insert(client)
            .clone())
    }

    /// Sends `arg` to `endpoint`, following leader redirects.
    pub async fn call(
        &self,
        endpoint: impl Into<Endpoint>,
        arg: RequestArg,
    ) -> Result<Option<RpcResult>, AdminError> {
        let mut endpoint = endpoint.into();
        let mut redirects = 0;
        loop {
            let response = self
                .client(&endpoint)?
                .execute(&RpcRequest::new(arg.clone()))
                .await?;

            match response.leader_redirect() {
                Some(Redirect::Leader(leader)) => {
                    let leader = Endpoint::new(leader.rpc_addr);
                    if redirects >= self.max_redirects {
                        warn!(%leader, redirects, "Not following leader redirect anymore");
                        return Err(AdminError::TooManyRedirects { redirects, leader });
                    }
                    redirects += 1;
                    debug!(from = %endpoint, to = %leader, path = %arg.service_path(), "Following leader redirect");
                    endpoint = leader;
                }
                Some(Redirect::NoLeader(message)) => return Err(AdminError::NoLeader(message)),
                None => return Ok(response.into_result()?),
            }
        }
    }

    async fn ack(&self, endpoint: impl Into<Endpoint>, arg: RequestArg) -> Result<(), AdminError> {
        let path = arg.service_path();
        match self.call(endpoint, arg).await? {
            Some(RpcResult::Ack) => Ok(()),
            _ => Err(AdminError::UnexpectedResult(path)),
        }
    }

    pub async fn create_partition(
        &self,
        endpoint: impl Into<Endpoint>,
        space: Space,
        partition_id: PartitionId,
    ) -> Result<(), AdminError> {
        self.ack(
            endpoint,
            RequestArg::CreatePartition {
                space,
                partition_id,
            },
        )
        .await
    }

    pub async fn delete_partition(
        &self,
        endpoint: impl Into<Endpoint>,
        partition_id: PartitionId,
    ) -> Result<(), AdminError> {
        self.ack(endpoint, RequestArg::DeletePartition { partition_id })
            .await
    }

    pub async fn delete_replica(
        &self,
        endpoint: impl Into<Endpoint>,
        partition_id: PartitionId,
    ) -> Result<(), AdminError> {
        self.ack(endpoint, RequestArg::DeleteReplica { partition_id })
            .await
    }

    pub async fn update_partition(
        &self,
        endpoint: impl Into<Endpoint>,
        partition_id: PartitionId,
        space: Space,
    ) -> Result<(), AdminError> {
        self.ack(
            endpoint,
            RequestArg::UpdatePartition {
                partition_id,
                space,
            },
        )
        .await
    }

    pub async fn change_member(
        &self,
        endpoint: impl Into<Endpoint>,
        change: ChangeMember,
    ) -> Result<(), AdminError> {
        self.ack(endpoint, RequestArg::ChangeMember(change)).await
    }

    /// `None` asks for every partition hosted at `endpoint`.
    pub async fn partition_info(
        &self,
        endpoint: impl Into<Endpoint>,
        partition_id: Option<PartitionId>,
    ) -> Result<Vec<PartitionInfo>, AdminError> {
        match self
            .call(endpoint, RequestArg::PartitionInfo { partition_id })
            .await?
        {
            Some(RpcResult::PartitionInfos(infos)) => Ok(infos),
            _ => Err(AdminError::UnexpectedResult(ServicePath::PartitionInfo)),
        }
    }

    pub async fn is_live(&self, endpoint: impl Into<Endpoint>) -> Result<bool, AdminError> {
        match self.call(endpoint, RequestArg::IsLive).await? {
            Some(RpcResult::Live(live)) => Ok(live),
            _ => Err(AdminError::UnexpectedResult(ServicePath::IsLive)),
        }
    }

    pub async fn stats(&self, endpoint: impl Into<Endpoint>) -> Result<ServerStats, AdminError> {
        match self.call(endpoint, RequestArg::Stats).await? {
            Some(RpcResult::Stats(stats)) => Ok(stats),
            _ => Err(AdminError::UnexpectedResult(ServicePath::Stats)),
        }
    }

    /// Closes the pooled connections to every endpoint.
    pub async fn close(&self) {
        let clients: Vec<_> = self
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.clients.clear();
        for (endpoint, client) in clients {
            if let Err(err) = client.close().await {
                debug!(%endpoint, %err, "Failed to close admin connection");
            }
        }
    }
}
