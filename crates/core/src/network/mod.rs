// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Request envelopes, dispatch chains and the pooled rpc transport between routers and
//! partition servers.

mod chain;
mod context;
mod envelope;
mod error;
mod pool;
mod rpc_client;
mod server;
pub mod tcp;
mod transport;

#[cfg(any(test, feature = "test-util"))]
mod local;

pub use chain::*;
pub use context::*;
pub use envelope::*;
pub use error::*;
pub use pool::{ConnectionPool, PooledClient};
pub use rpc_client::*;
pub use server::*;
pub use transport::*;

#[cfg(any(test, feature = "test-util"))]
pub use local::*;
