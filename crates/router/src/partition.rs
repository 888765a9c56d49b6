// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use async_trait::async_trait;
use tracing::debug;

use tessera_core::network::{CallContext, Connector, NetworkError, RpcClient, RpcRequest};
use tessera_types::errors::GenericError;
use tessera_types::net::{RequestArg, RpcResult};
use tessera_types::query::{
    DeleteByQueryResponse, SearchRequest, SearchResponse, SearchResponses,
};
use tessera_types::PartitionId;

use crate::error::QueryError;
use crate::sender::SearchSender;
use crate::stream::DocStream;

/// Sends queries to the partition server hosting one partition.
pub struct PartitionSender<C: Connector> {
    name: String,
    partition_id: PartitionId,
    client: RpcClient<C>,
    stream_buffer: usize,
}

impl<C: Connector> PartitionSender<C> {
    pub fn new(partition_id: PartitionId, client: RpcClient<C>) -> Self {
        Self {
            name: format!("partition:[{partition_id}]@{}", client.address(-1)),
            partition_id,
            client,
            stream_buffer: 64,
        }
    }

    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer;
        self
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    async fn call(&self, arg: RequestArg) -> Result<RpcResult, QueryError> {
        let response = self
            .client
            .execute(&RpcRequest::new(arg))
            .await
            .map_err(|source| QueryError::Network {
                sender: self.name.clone(),
                source,
            })?;
        match response.into_result() {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(self.unexpected()),
            Err(err) => Err(QueryError::remote(&self.name, err)),
        }
    }

    fn unexpected(&self) -> QueryError {
        QueryError::UnexpectedResult {
            sender: self.name.clone(),
        }
    }
}

#[async_trait]
impl<C: Connector> SearchSender for PartitionSender<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, QueryError> {
        match self
            .call(RequestArg::Search(request.for_partition(self.partition_id)))
            .await?
        {
            RpcResult::Search(response) => Ok(response),
            _ => Err(self.unexpected()),
        }
    }

    async fn msearch(&self, requests: &[SearchRequest]) -> Result<SearchResponses, QueryError> {
        let requests = requests
            .iter()
            .map(|request| request.for_partition(self.partition_id))
            .collect();
        match self.call(RequestArg::MSearch(requests)).await? {
            RpcResult::MSearch(responses) => Ok(responses),
            _ => Err(self.unexpected()),
        }
    }

    async fn delete_by_query(
        &self,
        request: &SearchRequest,
    ) -> Result<DeleteByQueryResponse, QueryError> {
        match self
            .call(RequestArg::DeleteByQuery(
                request.for_partition(self.partition_id),
            ))
            .await?
        {
            RpcResult::DeleteByQuery(response) => Ok(response),
            _ => Err(self.unexpected()),
        }
    }

    fn stream_search(&self, request: &SearchRequest, ctx: CallContext) -> DocStream {
        let client = self.client.clone();
        let name = self.name.clone();
        let request = RpcRequest::new(RequestArg::StreamSearch(
            request.for_partition(self.partition_id),
        ))
        .with_context(ctx);

        DocStream::spawn(
            "partition-stream-search",
            self.name.clone(),
            self.stream_buffer,
            |writer| async move {
                let sink = writer.clone();
                let result = client
                    .stream_execute(&request, move |doc| {
                        let sink = sink.clone();
                        async move { sink.send(doc).await.map_err(GenericError::from) }
                    })
                    .await;

                match result {
                    Ok(response) => match response.into_result() {
                        Ok(_) => writer.finish().await,
                        Err(err) => writer.fail(QueryError::remote(name, err)).await,
                    },
                    Err(NetworkError::Aborted(_)) if writer.is_closed() => {
                        debug!(sender = %name, "Stream consumer went away");
                    }
                    Err(source) => {
                        writer
                            .fail(QueryError::Network {
                                sender: name,
                                source,
                            })
                            .await
                    }
                }
            },
        )
    }
}
