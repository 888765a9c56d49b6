// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use serde::{Deserialize, Serialize};

/// # Router options
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "kebab-case")]
pub struct RouterOptions {
    /// # Maximum leader redirects
    ///
    /// How many times an admin request follows a not-leader answer before giving up.
    pub max_redirects: u32,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self { max_redirects: 3 }
    }
}
