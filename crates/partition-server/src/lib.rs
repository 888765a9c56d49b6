// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The partition server: hosts partitions, serves their control plane and runs queries against
//! them.

mod error;
mod handlers;
mod local;
mod redirect;
mod registry;
mod resolver;
mod search;
mod server;
mod store;

pub use error::{EngineError, RaftError, StoreError};
pub use handlers::*;
pub use local::{LocalRaft, LocalStoreFactory, MemoryEngine, StaticCoordinator};
pub use redirect::LeaderRedirect;
pub use registry::PartitionRegistry;
pub use resolver::RaftResolver;
pub use search::{SearchHandler, StreamSearchService};
pub use server::Server;
pub use store::{Coordinator, Engine, PartitionStore, RaftNode, Reader, StoreFactory};
