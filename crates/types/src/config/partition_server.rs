// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::partition::Replica;

/// # Partition server options
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionServerOptions {
    /// # Bind address
    pub bind_address: SocketAddr,

    /// # Advertised address
    ///
    /// `host:port` other nodes use to reach this server. Defaults to the bind address.
    #[builder(setter(strip_option))]
    pub advertised_address: Option<String>,

    /// # Data directory
    ///
    /// Defaults to `<base-dir>/<node-name>/partitions`.
    #[builder(setter(strip_option))]
    pub data_dir: Option<PathBuf>,

    /// # Static peers
    ///
    /// Cluster members known up front. Membership changes can only add nodes listed here.
    pub static_peers: Vec<Replica>,
}

impl Default for PartitionServerOptions {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8081)),
            advertised_address: None,
            data_dir: None,
            static_peers: Vec::new(),
        }
    }
}
