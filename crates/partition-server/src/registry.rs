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

use dashmap::{DashMap, DashSet};

use tessera_types::PartitionId;

use crate::store::PartitionStore;

/// Partitions hosted on this node, by id.
#[derive(Default)]
pub struct PartitionRegistry {
    stores: DashMap<PartitionId, Arc<PartitionStore>>,
    creating: DashSet<PartitionId>,
}

impl PartitionRegistry {
    pub fn get(&self, id: PartitionId) -> Option<Arc<PartitionStore>> {
        self.stores.get(&id).map(|store| Arc::clone(store.value()))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// All hosted partitions ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<PartitionStore>> {
        let mut stores: Vec<_> = self
            .stores
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        stores.sort_by_key(|store| store.id());
        stores
    }

    /// Claims `id` for a partition that is being created. Returns `None` if the id is hosted
    /// already or another create of it is in flight.
    pub(crate) fn reserve(&self, id: PartitionId) -> Option<Reservation<'_>> {
        if !self.creating.insert(id) {
            return None;
        }
        let reservation = Reservation { registry: self, id };
        // a create that held the id before us inserts before it releases its reservation
        if self.stores.contains_key(&id) {
            return None;
        }
        Some(reservation)
    }

    pub(crate) fn remove(&self, id: PartitionId) -> Option<Arc<PartitionStore>> {
        self.stores.remove(&id).map(|(_, store)| store)
    }

    pub(crate) fn drain(&self) -> Vec<Arc<PartitionStore>> {
        let ids: Vec<_> = self.stores.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

/// Exclusive right to create one partition. Released on drop.
pub(crate) struct Reservation<'a> {
    registry: &'a PartitionRegistry,
    id: PartitionId,
}

impl Reservation<'_> {
    /// Starts hosting `store` under the reserved id.
    pub(crate) fn commit(self, store: Arc<PartitionStore>) {
        debug_assert_eq!(store.id(), self.id);
        self.registry.stores.insert(self.id, store);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.creating.remove(&self.id);
    }
}
