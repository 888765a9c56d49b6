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
use enumset::{enum_set, EnumSet};
use tracing::{debug, error};

use tessera_core::network::{
    DocSink, Handler, HandlerError, InitHandler, RpcRequest, RpcResponse, StreamService,
};
use tessera_core::catch_panic;
use tessera_types::net::{RequestArg, RpcResult, ServicePath};
use tessera_types::query::{DeleteByQueryResponse, SearchResponse};

use crate::handlers::{unexpected, AdminScope};
use crate::server::Server;

/// Runs queries against the engine of the partition bound by store resolution.
pub struct SearchHandler;

#[async_trait]
impl Handler<AdminScope> for SearchHandler {
    fn name(&self) -> &'static str {
        "search"
    }

    fn operations(&self) -> EnumSet<ServicePath> {
        enum_set!(ServicePath::Search | ServicePath::MSearch | ServicePath::DeleteByQuery)
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        resp: &mut RpcResponse,
        scope: &mut AdminScope,
    ) -> Result<(), HandlerError> {
        let engine = scope.require_store(self.name())?.engine();
        let result = match &req.arg {
            RequestArg::Search(request) => RpcResult::Search(engine.search(request).await?),
            RequestArg::MSearch(requests) => {
                let mut responses = Vec::with_capacity(requests.len());
                for request in requests {
                    responses.push(engine.search(request).await?);
                }
                RpcResult::MSearch(responses)
            }
            RequestArg::DeleteByQuery(request) => RpcResult::DeleteByQuery(
                DeleteByQueryResponse::deleted(engine.delete_by_query(request).await?),
            ),
            _ => return Err(unexpected(self.name(), req)),
        };
        resp.set_result(result);
        Ok(())
    }
}

/// Streams the hits of one partition document by document. The final response carries the
/// search totals without hits.
pub struct StreamSearchService {
    server: Server,
    init: InitHandler,
}

impl StreamSearchService {
    pub fn new(server: Server, init: InitHandler) -> Self {
        Self { server, init }
    }

    async fn stream(&self, req: &mut RpcRequest, sink: &DocSink) -> Result<RpcResult, HandlerError> {
        self.init.admit(req)?;
        let ctx = req.context().clone();

        let RequestArg::StreamSearch(request) = &req.arg else {
            return Err(unexpected("stream-search", req));
        };
        let partition_id = request.partition_id.ok_or_else(|| {
            HandlerError::BadRequest("stream search request names no partition".to_owned())
        })?;
        let store = self
            .server
            .get_partition(partition_id)
            .ok_or(HandlerError::PartitionNotExist(partition_id))?;

        let mut response: SearchResponse = ctx.run(store.engine().search(request)).await??;
        let hits = std::mem::take(&mut response.hits);
        debug!(%partition_id, hits = hits.len(), "Streaming search hits");
        for doc in hits {
            ctx.run(sink.send(doc))
                .await?
                .map_err(|_| HandlerError::internal("stream receiver went away"))?;
        }
        Ok(RpcResult::Search(response))
    }
}

#[async_trait]
impl StreamService for StreamSearchService {
    async fn call(&self, mut req: RpcRequest, sink: DocSink) -> RpcResponse {
        let mut resp = RpcResponse::new(req.message_id);
        match catch_panic(self.stream(&mut req, &sink)).await {
            Ok(Ok(result)) => resp.set_result(result),
            Ok(Err(err)) => resp.fail(&err),
            Err(message) => {
                error!(message_id = %req.message_id, %message, "Stream search panicked");
                resp.fail(&HandlerError::Panicked {
                    handler: "stream-search",
                    message,
                });
            }
        }
        req.release();
        resp
    }
}
