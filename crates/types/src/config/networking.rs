// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use super::InvalidConfigurationError;

/// The default maximum size for frames (32 MiB).
pub const DEFAULT_MESSAGE_SIZE_LIMIT: usize = 32 * 1024 * 1024;

/// # Networking options
///
/// Options of the rpc transport between routers and partition servers.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkingOptions {
    /// # Connect timeout
    ///
    /// TCP connection timeout for outbound connections.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub connect_timeout: humantime::Duration,

    /// # Request timeout
    ///
    /// Deadline applied to requests whose caller did not set one.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub request_timeout: humantime::Duration,

    /// # Stream buffer size
    ///
    /// Number of documents buffered per streaming search before the producer waits.
    pub stream_buffer_size: usize,

    /// # Message size limit
    ///
    /// Maximum size of a single frame on the wire.
    pub message_size_limit: usize,
}

impl NetworkingOptions {
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.into()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout.into()
    }

    pub(super) fn validate(&self) -> Result<(), InvalidConfigurationError> {
        if self.stream_buffer_size == 0 {
            return Err(InvalidConfigurationError::ZeroNetworkingValue(
                "stream-buffer-size",
            ));
        }
        if self.message_size_limit == 0 {
            return Err(InvalidConfigurationError::ZeroNetworkingValue(
                "message-size-limit",
            ));
        }
        if self.connect_timeout().is_zero() {
            return Err(InvalidConfigurationError::ZeroNetworkingValue(
                "connect-timeout",
            ));
        }
        Ok(())
    }
}

impl Default for NetworkingOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3).into(),
            request_timeout: Duration::from_secs(10).into(),
            stream_buffer_size: 64,
            message_size_limit: DEFAULT_MESSAGE_SIZE_LIMIT,
        }
    }
}
