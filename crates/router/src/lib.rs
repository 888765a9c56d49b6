// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Routes queries across partitions and spaces, and drives the control plane of partition
//! servers.

mod admin;
mod error;
mod multi;
mod partition;
mod sender;
mod stream;

pub use admin::{AdminClient, AdminError};
pub use error::QueryError;
pub use multi::MultiSender;
pub use partition::PartitionSender;
pub use sender::SearchSender;
pub use stream::{DocStream, DocStreamWriter};
