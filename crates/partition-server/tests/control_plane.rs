// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::result::Result;
use std::sync::Arc;

use async_trait::async_trait;
use googletest::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use tessera_core::network::{
    LocalConnector, Redirect, RpcClient, RpcRequest, RpcResponse, RpcServerBuilder,
};
use tessera_partition_server::{
    Engine, EngineError, LocalRaft, LocalStoreFactory, RaftNode, RaftResolver, Reader, Server,
    StaticCoordinator, StoreError, StoreFactory,
};
use tessera_types::config::Configuration;
use tessera_types::errors::codes;
use tessera_types::net::{RequestArg, RpcResult};
use tessera_types::partition::{
    ChangeMember, ChangeMemberOp, IndexStatus, Partition, Replica, Space,
};
use tessera_types::query::{Document, SearchRequest, SearchResponse};
use tessera_types::{NodeId, PartitionId, Version};

const ENDPOINT: &str = "10.0.0.1:8081";

fn peer() -> Replica {
    Replica::new(NodeId::new(2), "10.0.0.2:8081")
}

struct Node {
    server: Server,
    client: RpcClient<LocalConnector>,
    _dir: TempDir,
}

impl Node {
    fn start(factory: Arc<dyn StoreFactory>, coordinator: StaticCoordinator) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let mut config = Configuration::default();
        config.partition_server.data_dir = Some(dir.path().to_path_buf());
        config.partition_server.advertised_address = Some(ENDPOINT.to_owned());
        config.partition_server.static_peers = vec![peer()];

        let server = Server::new(&config, factory, Arc::new(coordinator));
        let mut builder = RpcServerBuilder::new(config.networking.clone());
        server.start(&mut builder);

        let connector = LocalConnector::new();
        connector.register(ENDPOINT, builder.build());
        let client = RpcClient::new(Arc::new(connector), [ENDPOINT])?;
        Ok(Self {
            server,
            client,
            _dir: dir,
        })
    }

    fn local() -> anyhow::Result<(Self, Arc<LocalStoreFactory>)> {
        let factory = Arc::new(LocalStoreFactory::new(NodeId::new(1)));
        let node = Self::start(
            Arc::clone(&factory) as Arc<dyn StoreFactory>,
            StaticCoordinator::new([peer(), Replica::new(NodeId::new(3), "10.0.0.3:8081")]),
        )?;
        Ok((node, factory))
    }

    async fn call(&self, arg: RequestArg) -> anyhow::Result<RpcResponse> {
        Ok(self.client.execute(&RpcRequest::new(arg)).await?)
    }

    async fn create(&self, id: u32) -> anyhow::Result<()> {
        let resp = self
            .call(RequestArg::CreatePartition {
                space: Space::new("db", "books", Version::MIN),
                partition_id: PartitionId::new(id),
            })
            .await?;
        resp.into_result()?;
        Ok(())
    }
}

fn update(id: u32, version: u64) -> RequestArg {
    RequestArg::UpdatePartition {
        partition_id: PartitionId::new(id),
        space: Space::new("db", "books", Version::new(version)),
    }
}

fn change(id: u32, node: u64, method: ChangeMemberOp) -> RequestArg {
    RequestArg::ChangeMember(ChangeMember {
        partition_id: PartitionId::new(id),
        node_id: NodeId::new(node),
        method,
    })
}

#[test_log::test(tokio::test)]
async fn create_twice_reports_duplicate() -> anyhow::Result<()> {
    let (node, factory) = Node::local()?;
    node.create(1).await?;
    let id = PartitionId::new(1);
    let store = node.server.get_partition(id).expect("hosted");
    let engine = factory.engine(id).expect("opened");
    let raft = factory.raft(id).expect("opened");
    engine.insert(Document::new("1-a").with_score(0.5));

    let resp = node
        .call(RequestArg::CreatePartition {
            space: Space::new("db", "books", Version::new(3)),
            partition_id: id,
        })
        .await?;
    assert_that!(resp.status, eq(codes::PARTITION_DUPLICATE));

    let hosted = node.server.get_partition(id).expect("still hosted");
    assert!(Arc::ptr_eq(&hosted, &store));
    assert_that!(hosted.version(), eq(Version::MIN));
    assert!(Arc::ptr_eq(&factory.engine(id).expect("opened"), &engine));
    assert!(!engine.is_closed());
    assert!(!raft.is_stopped());
    assert_that!(engine.doc_count()?, eq(1));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn update_only_accepts_newer_versions() -> anyhow::Result<()> {
    let (node, factory) = Node::local()?;
    node.create(1).await?;

    let resp = node.call(update(1, 1)).await?;
    assert_that!(resp.status, eq(codes::PARTITION_STALE_VERSION));

    let resp = node.call(update(1, 2)).await?;
    assert!(resp.is_success());
    let engine = factory.engine(PartitionId::new(1)).expect("opened");
    assert_that!(engine.schema_version(), some(eq(Version::new(2))));

    let resp = node.call(update(1, 2)).await?;
    assert_that!(resp.status, eq(codes::PARTITION_STALE_VERSION));
    let store = node.server.get_partition(PartitionId::new(1)).expect("hosted");
    assert_that!(store.version(), eq(Version::new(2)));

    let resp = node.call(update(9, 5)).await?;
    assert_that!(resp.status, eq(codes::PARTITION_NOT_EXIST));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn follower_redirects_to_known_leader() -> anyhow::Result<()> {
    let (node, factory) = Node::local()?;
    node.create(1).await?;
    let raft = factory.raft(PartitionId::new(1)).expect("opened");
    raft.set_leader(NodeId::new(2));

    let resp = node.call(update(1, 2)).await?;
    assert_that!(resp.status, eq(codes::PARTITION_NOT_LEADER));
    assert_that!(resp.leader_redirect(), some(eq(Redirect::Leader(peer()))));

    // the follower did not apply anything
    let store = node.server.get_partition(PartitionId::new(1)).expect("hosted");
    assert_that!(store.version(), eq(Version::MIN));

    // removing the local replica is never redirected
    let resp = node
        .call(RequestArg::DeleteReplica {
            partition_id: PartitionId::new(1),
        })
        .await?;
    assert!(resp.is_success());
    assert_that!(resp.leader_redirect(), none());
    assert!(node.server.get_partition(PartitionId::new(1)).is_none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn no_leader_and_unknown_leader() -> anyhow::Result<()> {
    let (node, factory) = Node::local()?;
    node.create(1).await?;
    let raft = factory.raft(PartitionId::new(1)).expect("opened");

    raft.set_leader(NodeId::INVALID);
    let resp = node.call(update(1, 2)).await?;
    assert_that!(resp.status, eq(codes::PARTITION_NO_LEADER));
    assert_that!(resp.error.as_deref(), some(eq("partition:[1] no leader")));

    raft.set_leader(NodeId::new(42));
    let resp = node.call(update(1, 2)).await?;
    assert_that!(resp.status, eq(codes::INTERNAL_ERROR));
    assert_that!(resp.leader_redirect(), none());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn change_member_adds_and_removes() -> anyhow::Result<()> {
    let (node, factory) = Node::local()?;
    node.create(1).await?;
    let raft = factory.raft(PartitionId::new(1)).expect("opened");

    let resp = node.call(change(1, 3, ChangeMemberOp::AddNode)).await?;
    assert!(resp.is_success());
    assert!(node.server.resolver().contains(NodeId::new(3)));
    assert_that!(
        raft.members(),
        elements_are![eq(NodeId::new(1)), eq(NodeId::new(3))]
    );

    let resp = node.call(change(1, 3, ChangeMemberOp::RemoveNode)).await?;
    assert!(resp.is_success());
    assert!(!node.server.resolver().contains(NodeId::new(3)));
    assert_that!(raft.change_count(), eq(2));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn change_member_requires_leadership_and_known_node() -> anyhow::Result<()> {
    let (node, factory) = Node::local()?;
    node.create(1).await?;
    let raft = factory.raft(PartitionId::new(1)).expect("opened");

    let resp = node.call(change(1, 77, ChangeMemberOp::AddNode)).await?;
    assert_that!(resp.status, eq(codes::INTERNAL_ERROR));
    assert_that!(resp.error.as_deref(), some(contains_substring("77")));

    raft.set_leader(NodeId::new(2));
    let resp = node.call(change(1, 3, ChangeMemberOp::AddNode)).await?;
    assert_that!(resp.status, eq(codes::PARTITION_NOT_LEADER));
    assert!(!node.server.resolver().contains(NodeId::new(3)));
    assert_that!(raft.change_count(), eq(0));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn partition_info_for_one_or_all() -> anyhow::Result<()> {
    let (node, factory) = Node::local()?;
    for id in [3, 1, 2] {
        node.create(id).await?;
    }
    factory
        .engine(PartitionId::new(2))
        .expect("opened")
        .insert(Document::new("a"));

    let resp = node
        .call(RequestArg::PartitionInfo { partition_id: None })
        .await?;
    let Some(RpcResult::PartitionInfos(infos)) = resp.into_result()? else {
        anyhow::bail!("expected partition infos");
    };
    let ids: Vec<_> = infos.iter().map(|info| info.partition_id.as_u32()).collect();
    assert_that!(ids, elements_are![eq(1), eq(2), eq(3)]);
    assert_that!(infos[1].doc_num, eq(1));
    assert_that!(infos[1].index_status, eq(IndexStatus::Finished));

    let resp = node
        .call(RequestArg::PartitionInfo {
            partition_id: Some(PartitionId::new(3)),
        })
        .await?;
    let Some(RpcResult::PartitionInfos(infos)) = resp.into_result()? else {
        anyhow::bail!("expected partition infos");
    };
    assert_that!(infos.len(), eq(1));
    assert_that!(infos[0].partition_id, eq(PartitionId::new(3)));

    let resp = node
        .call(RequestArg::PartitionInfo {
            partition_id: Some(PartitionId::new(8)),
        })
        .await?;
    assert_that!(resp.status, eq(codes::PARTITION_NOT_EXIST));
    Ok(())
}

/// Engine whose reader blows up, to check that one partition cannot spoil the stats of others.
#[derive(Default)]
struct ExplodingEngine;

impl Reader for ExplodingEngine {
    fn doc_count(&self) -> Result<u64, EngineError> {
        panic!("doc count exploded");
    }

    fn capacity(&self) -> Result<u64, EngineError> {
        Ok(0)
    }
}

#[async_trait]
impl Engine for ExplodingEngine {
    fn reader(&self) -> &dyn Reader {
        self
    }

    fn index_status(&self) -> IndexStatus {
        IndexStatus::Indexing
    }

    async fn update_schema(&self, _space: &Space) -> Result<(), EngineError> {
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, EngineError> {
        Ok(SearchResponse::new(&request.db_name, &request.space_name))
    }

    async fn delete_by_query(&self, _request: &SearchRequest) -> Result<u64, EngineError> {
        Err(EngineError::Closed)
    }

    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Opens local stores, except for the partitions listed in `exploding`.
struct MixedFactory {
    local: LocalStoreFactory,
    exploding: Mutex<Vec<PartitionId>>,
}

#[async_trait]
impl StoreFactory for MixedFactory {
    async fn open(
        &self,
        space: &Space,
        partition: &Partition,
        resolver: &RaftResolver,
    ) -> Result<(Arc<dyn RaftNode>, Arc<dyn Engine>), StoreError> {
        if self.exploding.lock().contains(&partition.id) {
            let raft: Arc<dyn RaftNode> = Arc::new(LocalRaft::new(NodeId::new(1)));
            return Ok((raft, Arc::new(ExplodingEngine)));
        }
        self.local.open(space, partition, resolver).await
    }
}

#[test_log::test(tokio::test)]
async fn stats_isolate_failing_partitions() -> anyhow::Result<()> {
    let factory = Arc::new(MixedFactory {
        local: LocalStoreFactory::new(NodeId::new(1)),
        exploding: Mutex::new(vec![PartitionId::new(2)]),
    });
    let node = Node::start(
        Arc::clone(&factory) as Arc<dyn StoreFactory>,
        StaticCoordinator::default(),
    )?;
    for id in 1..=3 {
        node.create(id).await?;
    }
    let closed = factory.local.engine(PartitionId::new(3)).expect("opened");
    closed.close().await?;

    let resp = node.call(RequestArg::Stats).await?;
    let Some(RpcResult::Stats(stats)) = resp.into_result()? else {
        anyhow::bail!("expected stats");
    };

    assert_that!(stats.active_connections, ge(1));
    assert_that!(stats.partition_infos.len(), eq(3));
    assert_that!(stats.partition_infos[0].error, none());
    assert_that!(
        stats.partition_infos[1].error.as_deref(),
        some(contains_substring("doc count exploded"))
    );
    assert_that!(
        stats.partition_infos[2].error.as_deref(),
        some(contains_substring("engine is closed"))
    );

    // the server keeps serving after the panic
    let resp = node.call(RequestArg::IsLive).await?;
    assert_that!(resp.result, some(eq(RpcResult::Live(true))));
    Ok(())
}

fn seed(factory: &LocalStoreFactory, id: u32) {
    let engine = factory.engine(PartitionId::new(id)).expect("opened");
    for (doc, score) in [("a", 0.2), ("b", 0.8), ("c", 0.5)] {
        let mut doc = Document::new(format!("{id}-{doc}")).with_score(score);
        doc.source = json!({ "partition": id });
        engine.insert(doc);
    }
}

#[test_log::test(tokio::test)]
async fn search_and_stream_one_partition() -> anyhow::Result<()> {
    let (node, factory) = Node::local()?;
    node.create(1).await?;
    seed(&factory, 1);

    let mut request = SearchRequest::new("db", "books").for_partition(PartitionId::new(1));
    request.size = 2;
    let resp = node.call(RequestArg::Search(request.clone())).await?;
    let Some(RpcResult::Search(result)) = resp.into_result()? else {
        anyhow::bail!("expected a search result");
    };
    let ids: Vec<_> = result.hits.iter().map(|doc| doc.id.as_str()).collect();
    assert_that!(ids, elements_are![eq("1-b"), eq("1-c")]);
    assert_that!(result.total, eq(3));

    let streamed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&streamed);
    let end = node
        .client
        .stream_execute(
            &RpcRequest::new(RequestArg::StreamSearch(request)),
            move |doc| {
                sink.lock().push(doc.id);
                async { Ok(()) }
            },
        )
        .await?;
    assert!(end.is_success());
    let streamed = streamed.lock().clone();
    assert_that!(streamed, elements_are![eq("1-b"), eq("1-c")]);

    let mut delete = SearchRequest::new("db", "books").for_partition(PartitionId::new(1));
    delete.query = json!({ "ids": ["1-a"] });
    let resp = node.call(RequestArg::DeleteByQuery(delete)).await?;
    let Some(RpcResult::DeleteByQuery(deleted)) = resp.into_result()? else {
        anyhow::bail!("expected a delete result");
    };
    assert_that!(deleted.deleted, eq(1));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn search_unknown_partition() -> anyhow::Result<()> {
    let (node, _) = Node::local()?;
    let request = SearchRequest::new("db", "books").for_partition(PartitionId::new(4));
    let resp = node.call(RequestArg::Search(request.clone())).await?;
    assert_that!(resp.status, eq(codes::PARTITION_NOT_EXIST));

    let end = node
        .client
        .stream_execute(
            &RpcRequest::new(RequestArg::StreamSearch(request)),
            |_doc| async { Ok(()) },
        )
        .await?;
    assert_that!(end.status, eq(codes::PARTITION_NOT_EXIST));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn stopping_server_refuses_stream_search() -> anyhow::Result<()> {
    let (node, factory) = Node::local()?;
    node.create(1).await?;
    seed(&factory, 1);
    node.server.shutdown().await;

    let streamed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&streamed);
    let request = SearchRequest::new("db", "books").for_partition(PartitionId::new(1));
    let end = node
        .client
        .stream_execute(
            &RpcRequest::new(RequestArg::StreamSearch(request)),
            move |doc| {
                sink.lock().push(doc.id);
                async { Ok(()) }
            },
        )
        .await?;
    assert_that!(end.status, eq(codes::SERVICE_UNAVAILABLE));
    assert!(streamed.lock().is_empty());
    Ok(())
}
