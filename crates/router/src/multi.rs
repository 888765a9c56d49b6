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

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, trace};

use tessera_core::network::CallContext;
use tessera_types::query::{
    DeleteByQueryResponse, SearchRequest, SearchResponse, SearchResponses,
};

use crate::error::QueryError;
use crate::sender::{fan_out, SearchSender};
use crate::stream::DocStream;

const STREAM_BUFFER: usize = 64;

/// Scatter-gather over a group of senders, e.g. the partitions of a space or several spaces.
///
/// A `MultiSender` is a [`SearchSender`] itself, so groups nest.
pub struct MultiSender {
    name: String,
    senders: Vec<Arc<dyn SearchSender>>,
}

impl MultiSender {
    pub fn new(name: impl Into<String>, senders: Vec<Arc<dyn SearchSender>>) -> Self {
        Self {
            name: name.into(),
            senders,
        }
    }

    pub fn senders(&self) -> &[Arc<dyn SearchSender>] {
        &self.senders
    }

    fn ensure_senders(&self) -> Result<(), QueryError> {
        if self.senders.is_empty() {
            Err(QueryError::NoSenders)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SearchSender for MultiSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, QueryError> {
        self.ensure_senders()?;
        let order = request.sort_order()?;
        let window = request.window();
        let shard_request = Arc::new(request.for_shards());

        let results = fan_out("search", &self.senders, |sender| {
            let shard_request = Arc::clone(&shard_request);
            async move { sender.search(&shard_request).await }
        })
        .await;

        let mut merged: Option<SearchResponse> = None;
        for (index, result) in results {
            let response = result?;
            let sender = self.senders[index].name();
            trace!(%sender, hits = response.hits.len(), "Merging search response");
            let merge_result = match merged.as_mut() {
                Some(base) => base.merge(response, &order, window),
                None => response.check().map(|()| {
                    let mut base = response;
                    base.normalize(&order, window);
                    merged = Some(base);
                }),
            };
            merge_result.map_err(|source| QueryError::Merge {
                sender: sender.to_owned(),
                source,
            })?;
        }

        let mut merged = merged.ok_or(QueryError::NoSenders)?;
        merged.paginate(request.from, request.size);
        Ok(merged)
    }

    async fn msearch(&self, requests: &[SearchRequest]) -> Result<SearchResponses, QueryError> {
        self.ensure_senders()?;
        let orders = requests
            .iter()
            .map(SearchRequest::sort_order)
            .collect::<Result<Vec<_>, _>>()?;
        let shard_requests: Arc<Vec<SearchRequest>> =
            Arc::new(requests.iter().map(SearchRequest::for_shards).collect());

        let results = fan_out("msearch", &self.senders, |sender| {
            let shard_requests = Arc::clone(&shard_requests);
            async move { sender.msearch(&shard_requests).await }
        })
        .await;

        let mut merged: Option<SearchResponses> = None;
        for (index, result) in results {
            let responses = result?;
            let sender = &self.senders[index];
            let merge_result = match merged.as_mut() {
                Some(base) => sender.merge_result_arr(base, responses, &shard_requests),
                // the first arrival only becomes the baseline if every response in it is sound
                None => responses.iter().try_for_each(SearchResponse::check).map(|()| {
                    let mut base = responses;
                    for (response, (order, request)) in
                        base.iter_mut().zip(orders.iter().zip(requests))
                    {
                        response.normalize(order, request.window());
                    }
                    merged = Some(base);
                }),
            };
            merge_result.map_err(|source| QueryError::Merge {
                sender: sender.name().to_owned(),
                source,
            })?;
        }

        let mut merged = merged.ok_or(QueryError::NoSenders)?;
        for (response, request) in merged.iter_mut().zip(requests) {
            response.paginate(request.from, request.size);
        }
        Ok(merged)
    }

    /// Fails with the first error observed. Otherwise any one success stands for all of them.
    async fn delete_by_query(
        &self,
        request: &SearchRequest,
    ) -> Result<DeleteByQueryResponse, QueryError> {
        self.ensure_senders()?;
        let request = Arc::new(request.clone());

        let results = fan_out("delete-by-query", &self.senders, |sender| {
            let request = Arc::clone(&request);
            async move { sender.delete_by_query(&request).await }
        })
        .await;

        let mut outcome = None;
        for (index, result) in results {
            let response = result?;
            if !response.is_success() {
                return Err(QueryError::Remote {
                    sender: self.senders[index].name().to_owned(),
                    status: response.status,
                    message: response.error.unwrap_or_default(),
                });
            }
            outcome.get_or_insert(response);
        }
        outcome.ok_or(QueryError::NoSenders)
    }

    /// Drains the senders one after the other, in order. The first error ends the stream.
    fn stream_search(&self, request: &SearchRequest, ctx: CallContext) -> DocStream {
        if let Err(err) = self.ensure_senders() {
            return DocStream::failed(err);
        }

        let senders = self.senders.clone();
        let request = request.clone();
        let name = self.name.clone();

        // the task ends on its own once the consumer drops the stream
        DocStream::spawn("stream-search", self.name.clone(), STREAM_BUFFER, |writer| async move {
            for sender in senders {
                let mut docs = sender.stream_search(&request, ctx.clone());
                loop {
                    let next = tokio::select! {
                        biased;
                        err = ctx.done() => {
                            writer.fail(err.into()).await;
                            return;
                        }
                        next = docs.next() => next,
                    };
                    match next {
                        Some(Ok(doc)) => {
                            if writer.send(doc).await.is_err() {
                                debug!(stream = %name, "Stream consumer went away");
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            writer.fail(err).await;
                            return;
                        }
                        None => break,
                    }
                }
            }
            writer.finish().await;
        })
    }
}
