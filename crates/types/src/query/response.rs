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

use super::{Document, SearchRequest, SortOrder, SortOrderError};
use crate::errors::{codes, StatusCode};

/// Result of one search, either the partial result of one partition or the merged result of
/// several of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub db_name: String,
    pub space_name: String,
    #[serde(default)]
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub hits: Vec<Document>,
}

/// One response per request of a multi-search, in request order.
pub type SearchResponses = Vec<SearchResponse>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeError {
    #[error("partial result of '{space}' failed: [{status}] {message}")]
    Shard {
        space: String,
        status: StatusCode,
        message: String,
    },
    #[error("cannot merge {other} responses into {base} responses")]
    LengthMismatch { base: usize, other: usize },
    #[error(transparent)]
    Sort(#[from] SortOrderError),
}

impl SearchResponse {
    pub fn new(db_name: impl Into<String>, space_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            space_name: space_name.into(),
            ..Default::default()
        }
    }

    pub fn failed(
        db_name: impl Into<String>,
        space_name: impl Into<String>,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            error: Some(message.into()),
            ..Self::new(db_name, space_name)
        }
    }

    pub fn with_hits(mut self, hits: Vec<Document>) -> Self {
        self.total = hits.len() as u64;
        self.max_score = hits.iter().map(|d| d.score).reduce(f64::max);
        self.hits = hits;
        self
    }

    /// Returns the embedded failure of this result, if any.
    pub fn check(&self) -> Result<(), MergeError> {
        if self.status.is_success() && self.error.is_none() {
            return Ok(());
        }
        Err(MergeError::Shard {
            space: self.space_name.clone(),
            status: if self.status.is_success() {
                codes::INTERNAL_ERROR
            } else {
                self.status
            },
            message: self.error.clone().unwrap_or_default(),
        })
    }

    /// Brings a single partial result into the global order and bounds it to `window` hits.
    pub fn normalize(&mut self, order: &SortOrder, window: usize) {
        self.hits.sort_by(|a, b| order.compare(a, b));
        self.hits.truncate(window);
    }

    /// Folds `other` into this result. Totals add up, the best score wins and the hits are
    /// re-ranked and cut back to `window`. A failed `other` leaves `self` untouched.
    pub fn merge(
        &mut self,
        other: SearchResponse,
        order: &SortOrder,
        window: usize,
    ) -> Result<(), MergeError> {
        other.check()?;

        self.total = self.total.saturating_add(other.total);
        self.max_score = match (self.max_score, other.max_score) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.timed_out |= other.timed_out;
        self.hits.extend(other.hits);
        self.normalize(order, window);
        Ok(())
    }

    /// Drops the first `from` hits and keeps at most `size` of the rest.
    pub fn paginate(&mut self, from: usize, size: usize) {
        if from >= self.hits.len() {
            self.hits.clear();
            return;
        }
        self.hits.drain(..from);
        self.hits.truncate(size);
    }
}

/// Default multi-search merge: the i-th response of `other` is merged into the i-th response
/// of `base`, ranked by the sort order and window of the i-th request.
pub fn merge_responses(
    base: &mut SearchResponses,
    other: SearchResponses,
    requests: &[SearchRequest],
) -> Result<(), MergeError> {
    if base.len() != other.len() {
        return Err(MergeError::LengthMismatch {
            base: base.len(),
            other: other.len(),
        });
    }
    for (position, (into, from)) in base.iter_mut().zip(other).enumerate() {
        match requests.get(position) {
            Some(request) => into.merge(from, &request.sort_order()?, request.window())?,
            None => {
                return Err(MergeError::LengthMismatch {
                    base: requests.len(),
                    other: position + 1,
                })
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteByQueryResponse {
    #[serde(default)]
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub deleted: u64,
}

impl DeleteByQueryResponse {
    pub fn deleted(count: u64) -> Self {
        Self {
            deleted: count,
            ..Default::default()
        }
    }

    pub fn failed(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(message.into()),
            deleted: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success() && self.error.is_none()
    }
}
