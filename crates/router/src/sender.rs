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
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tracing::error;

use tessera_core::network::CallContext;
use tessera_core::{spawn_isolated, TaskError};
use tessera_types::query::{
    merge_responses, DeleteByQueryResponse, MergeError, SearchRequest, SearchResponse,
    SearchResponses,
};

use crate::error::QueryError;
use crate::stream::DocStream;

/// Something a query can be sent to: one partition, or a group of senders.
#[async_trait]
pub trait SearchSender: Send + Sync + 'static {
    /// Name errors of this sender are attributed to.
    fn name(&self) -> &str;

    /// Hits are ordered by the request's sort order and cover at most `from + size` documents.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, QueryError>;

    /// Returns one response per request, in request order.
    async fn msearch(&self, requests: &[SearchRequest]) -> Result<SearchResponses, QueryError>;

    async fn delete_by_query(
        &self,
        request: &SearchRequest,
    ) -> Result<DeleteByQueryResponse, QueryError>;

    /// Streams matching documents. The stream stops early once `ctx` ends.
    fn stream_search(&self, request: &SearchRequest, ctx: CallContext) -> DocStream;

    /// Folds the responses of this sender into `base`.
    fn merge_result_arr(
        &self,
        base: &mut SearchResponses,
        other: SearchResponses,
        requests: &[SearchRequest],
    ) -> Result<(), MergeError> {
        merge_responses(base, other, requests)
    }
}

/// Runs `op` against every sender concurrently and returns one result per sender in completion
/// order, tagged with the sender's position. A panicking sender yields
/// [`QueryError::Panicked`]; it never affects the other senders.
pub(crate) async fn fan_out<T, F, Fut>(
    task_name: &'static str,
    senders: &[Arc<dyn SearchSender>],
    op: F,
) -> Vec<(usize, Result<T, QueryError>)>
where
    T: Send + 'static,
    F: Fn(Arc<dyn SearchSender>) -> Fut,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    let mut inflight: FuturesUnordered<_> = senders
        .iter()
        .enumerate()
        .map(|(index, sender)| {
            spawn_isolated(task_name, op(Arc::clone(sender))).map(move |result| (index, result))
        })
        .collect();

    let mut results = Vec::with_capacity(senders.len());
    while let Some((index, result)) = inflight.next().await {
        let result = result.unwrap_or_else(|err| {
            let sender = senders[index].name().to_owned();
            let message = match err {
                TaskError::Panicked { message, .. } => message,
                other => other.to_string(),
            };
            error!(%sender, %message, "Sender task failed");
            Err(QueryError::Panicked { sender, message })
        });
        results.push((index, result));
    }
    results
}
