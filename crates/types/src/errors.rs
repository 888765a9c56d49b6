// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::fmt::Formatter;

/// Error type which abstracts away the actual [`std::error::Error`] type. Use this type
/// if you don't know the actual error type or if it is not important.
pub type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Numeric status carried in every response envelope.
#[derive(Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const fn new(code: u16) -> Self {
        StatusCode(code)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == codes::SUCCESS
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        codes::SUCCESS
    }
}

impl From<u16> for StatusCode {
    fn from(value: u16) -> Self {
        StatusCode(value)
    }
}

impl From<StatusCode> for u16 {
    fn from(value: StatusCode) -> Self {
        value.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(display_str) = self.display_str() {
            write!(f, "{} {}", self.0, display_str)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

pub mod codes {
    use super::StatusCode;

    macro_rules! codes {
        ($($name:ident $num:literal $str_name:literal,)*) => {
            $(pub const $name: StatusCode = StatusCode($num);)*

            impl StatusCode {
                pub(super) fn display_str(&self) -> Option<&'static str> {
                    $(if self.0 == $name.0 { return Some($str_name) })*
                    None
                }
            }
        };
    }

    codes!(
        SUCCESS 200 "Success",
        BAD_REQUEST 400 "Bad request",
        SERVICE_UNAVAILABLE 503 "Service unavailable",
        TIMEOUT 504 "Timeout",
        INTERNAL_ERROR 550 "Internal error",
        PARTITION_NOT_EXIST 564 "Partition not exist",
        PARTITION_DUPLICATE 565 "Partition duplicate",
        PARTITION_NOT_LEADER 566 "Partition not leader",
        PARTITION_NO_LEADER 567 "Partition no leader",
        PARTITION_STALE_VERSION 568 "Partition stale version",
        MERGE_FAILED 570 "Merge failed",
    );
}
