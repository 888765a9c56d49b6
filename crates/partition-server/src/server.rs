// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use tessera_core::network::{ChainBuilder, InitHandler, RpcServerBuilder, StoppingFlag};
use tessera_types::config::Configuration;
use tessera_types::net::ServicePath;
use tessera_types::partition::{Partition, Replica, Space};
use tessera_types::{NodeId, PartitionId};

use crate::error::StoreError;
use crate::handlers::{
    AdminScope, ChangeMemberHandler, CreatePartitionHandler, DeletePartitionHandler,
    DeleteReplicaHandler, IsLiveHandler, PartitionInfoHandler, StatsHandler,
    StoreResolutionHandler, UpdatePartitionHandler,
};
use crate::redirect::LeaderRedirect;
use crate::registry::PartitionRegistry;
use crate::resolver::RaftResolver;
use crate::search::{SearchHandler, StreamSearchService};
use crate::store::{Coordinator, PartitionStore, StoreFactory};

/// Process wide state of a partition server. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    node_id: NodeId,
    data_dir: PathBuf,
    registry: PartitionRegistry,
    resolver: RaftResolver,
    stopping: StoppingFlag,
    factory: Arc<dyn StoreFactory>,
    coordinator: Arc<dyn Coordinator>,
}

impl Server {
    pub fn new(
        config: &Configuration,
        factory: Arc<dyn StoreFactory>,
        coordinator: Arc<dyn Coordinator>,
    ) -> Self {
        let node_id = config.common.node_id;
        let resolver =
            RaftResolver::with_replicas(config.partition_server.static_peers.iter().cloned());
        resolver.add_node(Replica::new(node_id, config.advertised_address()));

        Self {
            inner: Arc::new(ServerInner {
                node_id,
                data_dir: config.partition_data_dir(),
                registry: PartitionRegistry::default(),
                resolver,
                stopping: StoppingFlag::default(),
                factory,
                coordinator,
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    pub fn registry(&self) -> &PartitionRegistry {
        &self.inner.registry
    }

    pub fn resolver(&self) -> &RaftResolver {
        &self.inner.resolver
    }

    pub fn coordinator(&self) -> &dyn Coordinator {
        self.inner.coordinator.as_ref()
    }

    pub fn get_partition(&self, id: PartitionId) -> Option<Arc<PartitionStore>> {
        self.inner.registry.get(id)
    }

    fn partition_dir(&self, id: PartitionId) -> PathBuf {
        self.inner.data_dir.join(id.to_string())
    }

    /// Registers the dispatch chains of every partition server operation.
    pub fn start(&self, builder: &mut RpcServerBuilder) {
        let init = || InitHandler::new(self.inner.stopping.clone());
        let connections = builder.connections();

        builder.register_chain(
            ChainBuilder::<AdminScope>::new(ServicePath::CreatePartition, init())
                .handler(CreatePartitionHandler::new(self.clone()))
                .build(),
        );
        builder.register_chain(
            ChainBuilder::<AdminScope>::new(ServicePath::DeletePartition, init())
                .handler(DeletePartitionHandler::new(self.clone()))
                .build(),
        );
        builder.register_chain(
            ChainBuilder::<AdminScope>::new(ServicePath::DeleteReplica, init())
                .handler(DeleteReplicaHandler::new(self.clone()))
                .build(),
        );
        builder.register_chain(
            ChainBuilder::<AdminScope>::new(ServicePath::UpdatePartition, init())
                .handler(StoreResolutionHandler::new(self.clone()))
                .handler(UpdatePartitionHandler)
                .error_transform(LeaderRedirect::new(self.clone()))
                .build(),
        );
        builder.register_chain(
            ChainBuilder::<AdminScope>::new(ServicePath::Stats, init())
                .handler(StatsHandler::new(self.clone(), connections))
                .build(),
        );
        builder.register_chain(
            ChainBuilder::<AdminScope>::new(ServicePath::IsLive, init())
                .handler(IsLiveHandler)
                .build(),
        );
        builder.register_chain(
            ChainBuilder::<AdminScope>::new(ServicePath::PartitionInfo, init())
                .handler(PartitionInfoHandler::new(self.clone()))
                .build(),
        );
        builder.register_chain(
            ChainBuilder::<AdminScope>::new(ServicePath::ChangeMember, init())
                .handler(StoreResolutionHandler::new(self.clone()))
                .handler(ChangeMemberHandler::new(self.clone()))
                .build(),
        );
        for path in [
            ServicePath::Search,
            ServicePath::MSearch,
            ServicePath::DeleteByQuery,
        ] {
            builder.register_chain(
                ChainBuilder::<AdminScope>::new(path, init())
                    .handler(StoreResolutionHandler::new(self.clone()))
                    .handler(SearchHandler)
                    .build(),
            );
        }
        builder.register_stream(
            ServicePath::StreamSearch,
            StreamSearchService::new(self.clone(), init()),
        );

        info!(node_id = %self.inner.node_id, "Partition server services registered");
    }

    /// Opens a new partition of `space` and starts hosting it.
    ///
    /// A create that fails tears down only what it set up itself. A partition hosted under the
    /// same id, or being created by a concurrent call, is never touched.
    pub async fn create_partition(
        &self,
        space: &Space,
        id: PartitionId,
    ) -> Result<Arc<PartitionStore>, StoreError> {
        if self.inner.stopping.is_stopping() {
            return Err(StoreError::Stopping);
        }
        let reservation = self
            .inner
            .registry
            .reserve(id)
            .ok_or(StoreError::Duplicate(id))?;

        let path = self.partition_dir(id);
        let preexisting = tokio::fs::metadata(&path).await.is_ok();
        if let Err(source) = tokio::fs::create_dir_all(&path).await {
            if !preexisting {
                self.purge_dir(id, &path, "partition").await;
            }
            return Err(StoreError::Io { path, source });
        }

        let partition = Partition::new(id, space, path.clone());
        let (raft, engine) = match self
            .inner
            .factory
            .open(space, &partition, &self.inner.resolver)
            .await
        {
            Ok(opened) => opened,
            Err(err) => {
                warn!(partition_id = %id, %err, "Opening partition failed, cleaning up");
                if !preexisting {
                    self.purge_dir(id, &path, "partition").await;
                }
                return Err(err);
            }
        };
        let store = Arc::new(PartitionStore::new(space.clone(), partition, raft, engine));
        reservation.commit(Arc::clone(&store));

        info!(
            partition_id = %id,
            space = %space.qualified_name(),
            version = %space.version,
            "Partition created"
        );
        Ok(store)
    }

    /// Stops hosting the partition and removes its data. Unknown ids are not an error.
    pub async fn delete_partition(&self, id: PartitionId) {
        self.remove_partition(id, "partition").await
    }

    /// Removes the local replica of a partition, leaving the other replicas untouched.
    pub async fn delete_replica(&self, id: PartitionId) {
        self.remove_partition(id, "replica").await
    }

    async fn remove_partition(&self, id: PartitionId, kind: &'static str) {
        let path = match self.inner.registry.remove(id) {
            Some(store) => {
                if let Err(err) = store.close().await {
                    warn!(partition_id = %id, %err, "Failed to close {kind} before removal");
                }
                store.partition().path
            }
            None => {
                info!(partition_id = %id, "No local {kind}, nothing to close");
                self.partition_dir(id)
            }
        };
        self.purge_dir(id, &path, kind).await;
        info!(partition_id = %id, "Deleted {kind}");
    }

    async fn purge_dir(&self, id: PartitionId, path: &Path, kind: &'static str) {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => debug!(partition_id = %id, path = %path.display(), "Removed {kind} data"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(partition_id = %id, path = %path.display(), %err, "Failed to remove {kind} data")
            }
        }
    }

    /// Refuses new calls, then closes every hosted partition. Close failures are logged.
    pub async fn shutdown(&self) {
        self.inner.stopping.stop();
        let stores = self.inner.registry.drain();
        info!(partitions = stores.len(), "Closing partitions");

        let results = join_all(stores.iter().map(|store| async move {
            (store.id(), store.close().await)
        }))
        .await;
        for (partition_id, result) in results {
            if let Err(err) = result {
                warn!(%partition_id, %err, "Failed to close partition during shutdown");
            }
        }
    }
}
