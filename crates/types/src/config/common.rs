// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::NodeId;

const DEFAULT_STORAGE_DIRECTORY: &str = "tessera-data";
const DEFAULT_NODE_NAME: &str = "tessera";

/// # Common options
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "kebab-case")]
pub struct CommonOptions {
    /// Unique name of this node. Defaults to `tessera`.
    #[builder(setter(strip_option))]
    node_name: Option<String>,

    /// # Node id
    ///
    /// Raft level identity of this node. Must be greater than zero.
    pub node_id: NodeId,

    /// # Base directory
    ///
    /// Root directory of all state of this node.
    #[builder(setter(strip_option))]
    base_dir: Option<PathBuf>,

    /// # Logging Filter
    ///
    /// Log filter configuration. Can be overridden by the `RUST_LOG` environment variable.
    pub log_filter: String,

    /// # Logging format
    pub log_format: LogFormat,

    /// # Disable ANSI in log output
    pub log_disable_ansi_codes: bool,

    /// # Shutdown grace timeout
    ///
    /// Upper bound for draining in-flight requests on shutdown, in
    /// [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub shutdown_timeout: humantime::Duration,
}

impl CommonOptions {
    pub fn node_name(&self) -> &str {
        self.node_name.as_deref().unwrap_or(DEFAULT_NODE_NAME)
    }

    pub fn set_node_name(&mut self, name: impl Into<String>) {
        self.node_name = Some(name.into());
    }

    pub fn set_base_dir(&mut self, path: PathBuf) {
        self.base_dir = Some(path);
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(DEFAULT_STORAGE_DIRECTORY)
        })
    }

    pub fn node_dir(&self) -> PathBuf {
        self.base_dir().join(self.node_name())
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        self.shutdown_timeout.into()
    }
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            node_name: None,
            node_id: NodeId::new(1),
            base_dir: None,
            log_filter: "warn,tessera=info".to_string(),
            log_format: Default::default(),
            log_disable_ansi_codes: false,
            shutdown_timeout: Duration::from_secs(60).into(),
        }
    }
}

/// # Log format
#[derive(Debug, Clone, Copy, Hash, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// # Pretty
    ///
    /// Enables verbose logging. Not recommended in production.
    #[default]
    Pretty,
    /// # Compact
    Compact,
    /// # Json
    ///
    /// One json object per line, for log collectors.
    Json,
}
