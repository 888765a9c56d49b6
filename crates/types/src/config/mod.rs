// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod common;
mod networking;
mod partition_server;
mod router;

pub use common::*;
pub use networking::*;
pub use partition_server::*;
pub use router::*;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::errors::GenericError;

#[derive(Debug, thiserror::Error)]
pub enum InvalidConfigurationError {
    #[error("node-id must be greater than zero")]
    InvalidNodeId,
    #[error("networking.{0} must be greater than zero")]
    ZeroNetworkingValue(&'static str),
    #[error("partition-server.advertised-address '{0}' is not a host:port pair")]
    InvalidAdvertisedAddress(String),
}

/// # Tessera configuration file
///
/// Configuration of a tessera node. A node always hosts a partition server; the router section
/// configures how outbound requests of this node are routed.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    #[serde(flatten)]
    pub common: CommonOptions,
    #[serde(default)]
    pub networking: NetworkingOptions,
    #[serde(default)]
    pub partition_server: PartitionServerOptions,
    #[serde(default)]
    pub router: RouterOptions,
}

impl Configuration {
    pub fn node_name(&self) -> &str {
        self.common.node_name()
    }

    /// Directory holding one sub-directory per hosted partition.
    pub fn partition_data_dir(&self) -> PathBuf {
        self.partition_server
            .data_dir
            .clone()
            .unwrap_or_else(|| self.common.node_dir().join("partitions"))
    }

    /// Address other nodes reach this node's partition server at.
    pub fn advertised_address(&self) -> String {
        self.partition_server
            .advertised_address
            .clone()
            .unwrap_or_else(|| self.partition_server.bind_address.to_string())
    }

    pub fn validate(&self) -> Result<(), InvalidConfigurationError> {
        if !self.common.node_id.is_valid() {
            return Err(InvalidConfigurationError::InvalidNodeId);
        }
        self.networking.validate()?;
        if let Some(address) = &self.partition_server.advertised_address {
            if address.rsplit_once(':').is_none() {
                return Err(InvalidConfigurationError::InvalidAdvertisedAddress(
                    address.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Dumps the configuration to a string
    pub fn dump(&self) -> Result<String, GenericError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::NodeId;

    #[test]
    fn default_config_is_valid() {
        let config = Configuration::default();
        config.validate().unwrap();
        assert!(config.partition_data_dir().ends_with("partitions"));
        assert_eq!("0.0.0.0:8081", config.advertised_address());
    }

    #[test]
    fn rejects_invalid_node_id() {
        let mut config = Configuration::default();
        config.common.node_id = NodeId::INVALID;
        assert!(matches!(
            config.validate(),
            Err(InvalidConfigurationError::InvalidNodeId)
        ));
    }

    #[test]
    fn dump_is_toml() {
        let dumped = Configuration::default().dump().unwrap();
        assert!(dumped.contains("log-filter"));
        assert!(dumped.contains("[networking]"));
    }
}
