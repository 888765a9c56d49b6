// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Query model shared by the router and the partitions: requests, documents, sort orders and the
//! ranked merge of partial results.

mod response;

pub use response::*;

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::PartitionId;

/// Sorting by this pseudo field orders documents by their relevance score.
pub const SCORE_FIELD: &str = "_score";
pub const DEFAULT_SEARCH_SIZE: usize = 50;

const fn default_size() -> usize {
    DEFAULT_SEARCH_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub db_name: String,
    pub space_name: String,
    /// Set by the router when the request is addressed to one partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<PartitionId>,
    /// Engine specific query body; the router never interprets it.
    #[serde(default)]
    pub query: serde_json::Value,
    #[serde(default)]
    pub sort: Vec<SortField>,
    #[serde(default)]
    pub from: usize,
    #[serde(default = "default_size")]
    pub size: usize,
}

impl SearchRequest {
    pub fn new(db_name: impl Into<String>, space_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            space_name: space_name.into(),
            partition_id: None,
            query: serde_json::Value::Null,
            sort: Vec::new(),
            from: 0,
            size: DEFAULT_SEARCH_SIZE,
        }
    }

    /// Validates the requested sort fields. An empty sort specification orders by score,
    /// highest first.
    pub fn sort_order(&self) -> Result<SortOrder, SortOrderError> {
        if self.sort.is_empty() {
            return Ok(SortOrder::by_score());
        }

        let mut seen = HashSet::with_capacity(self.sort.len());
        for (position, field) in self.sort.iter().enumerate() {
            if field.field.trim().is_empty() {
                return Err(SortOrderError::EmptyField(position));
            }
            if !seen.insert(field.field.as_str()) {
                return Err(SortOrderError::Duplicate(field.field.clone()));
            }
        }
        Ok(SortOrder(self.sort.clone()))
    }

    pub fn for_partition(&self, partition_id: PartitionId) -> SearchRequest {
        SearchRequest {
            partition_id: Some(partition_id),
            ..self.clone()
        }
    }

    /// Number of leading hits of the global order that are needed to answer this request.
    pub fn window(&self) -> usize {
        self.from.saturating_add(self.size)
    }

    /// The request to send to each shard. Shards cannot know which of their hits survive the
    /// global order, so each of them is asked for the whole window.
    pub fn for_shards(&self) -> SearchRequest {
        SearchRequest {
            from: 0,
            size: self.window(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub order: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SortOrderError {
    #[error("sort field at position {0} has no name")]
    EmptyField(usize),
    #[error("sort field '{0}' is specified more than once")]
    Duplicate(String),
}

/// A value a document is sorted by. Values of different kinds order as
/// `null < numbers < strings`; integers and floats compare numerically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortValue {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

static NULL_VALUE: SortValue = SortValue::Null;

/// Exact comparison of an integer with a float, without rounding the integer to `f64`. NaNs
/// order the way [`f64::total_cmp`] places them.
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    // 2^63, the first float above every i64
    const I64_END: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= I64_END {
        return Ordering::Less;
    }
    if float < -I64_END {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    // in range, so the conversion is exact
    int.cmp(&(whole as i64)).then_with(|| {
        if float > whole {
            Ordering::Less
        } else if float < whole {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

impl SortValue {
    pub fn total_cmp(&self, other: &SortValue) -> Ordering {
        use SortValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Int(a), Int(b)) => a.cmp(b),
            (Int(a), Float(b)) => cmp_int_float(*a, *b),
            (Float(a), Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Str(_), _) => Ordering::Greater,
            (_, Str(_)) => Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub score: f64,
    /// One value per sort field of the request, in request order.
    #[serde(default)]
    pub sort_values: Vec<SortValue>,
    #[serde(default)]
    pub source: serde_json::Value,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            score: 0.0,
            sort_values: Vec::new(),
            source: serde_json::Value::Null,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_sort_values(mut self, values: Vec<SortValue>) -> Self {
        self.sort_values = values;
        self
    }

    fn sort_value(&self, position: usize) -> &SortValue {
        self.sort_values.get(position).unwrap_or(&NULL_VALUE)
    }
}

/// A validated sort specification.
#[derive(Debug, Clone, PartialEq)]
pub struct SortOrder(Vec<SortField>);

impl SortOrder {
    pub fn by_score() -> Self {
        SortOrder(vec![SortField::desc(SCORE_FIELD)])
    }

    pub fn fields(&self) -> &[SortField] {
        &self.0
    }

    /// Total order over documents. Documents that tie on every sort field are ordered by id so
    /// that merging partial results never depends on the order they arrived in.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (position, field) in self.0.iter().enumerate() {
            let ordering = if field.field == SCORE_FIELD {
                a.score.total_cmp(&b.score)
            } else {
                a.sort_value(position).total_cmp(b.sort_value(position))
            };
            let ordering = match field.order {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use googletest::prelude::*;

    #[test]
    fn empty_sort_means_score_desc() {
        let req = SearchRequest::new("db", "space");
        let order = req.sort_order().unwrap();
        assert_that!(order.fields().len(), eq(1));

        let low = Document::new("a").with_score(0.1);
        let high = Document::new("b").with_score(0.9);
        assert_eq!(Ordering::Less, order.compare(&high, &low));
    }

    #[test]
    fn rejects_invalid_sort_fields() {
        let mut req = SearchRequest::new("db", "space");
        req.sort = vec![SortField::asc("price"), SortField::desc("price")];
        assert_that!(
            req.sort_order(),
            err(eq(SortOrderError::Duplicate("price".to_owned())))
        );

        req.sort = vec![SortField::asc(" ")];
        assert_that!(req.sort_order(), err(eq(SortOrderError::EmptyField(0))));
    }

    #[test]
    fn multi_field_order_with_id_tie_break() {
        let order = SortOrder(vec![SortField::asc("price"), SortField::desc(SCORE_FIELD)]);

        let cheap = Document::new("c").with_sort_values(vec![SortValue::Int(5), SortValue::Null]);
        let pricey =
            Document::new("a").with_sort_values(vec![SortValue::Float(7.5), SortValue::Null]);
        assert_eq!(Ordering::Less, order.compare(&cheap, &pricey));

        let same_a = Document::new("a").with_sort_values(vec![SortValue::Int(5)]);
        let same_b = Document::new("b").with_sort_values(vec![SortValue::Int(5)]);
        assert_eq!(Ordering::Less, order.compare(&same_a, &same_b));
    }

    #[test]
    fn mixed_value_kinds() {
        assert_eq!(
            Ordering::Less,
            SortValue::Null.total_cmp(&SortValue::Int(i64::MIN))
        );
        assert_eq!(
            Ordering::Equal,
            SortValue::Int(2).total_cmp(&SortValue::Float(2.0))
        );
        assert_eq!(
            Ordering::Greater,
            SortValue::Str("a".into()).total_cmp(&SortValue::Float(f64::MAX))
        );
    }

    #[test]
    fn integers_compare_exactly_against_floats() {
        let above_f64_precision = (1_i64 << 53) + 1;
        assert_eq!(
            Ordering::Greater,
            SortValue::Int(above_f64_precision).total_cmp(&SortValue::Float((1_u64 << 53) as f64))
        );
        assert_eq!(
            Ordering::Less,
            SortValue::Float((1_u64 << 53) as f64).total_cmp(&SortValue::Int(above_f64_precision))
        );
        // i64::MAX rounds up to 2^63 as a float
        assert_eq!(
            Ordering::Less,
            SortValue::Int(i64::MAX).total_cmp(&SortValue::Float(i64::MAX as f64))
        );
        assert_eq!(
            Ordering::Equal,
            SortValue::Int(i64::MIN).total_cmp(&SortValue::Float(i64::MIN as f64))
        );
        assert_eq!(
            Ordering::Greater,
            SortValue::Int(3).total_cmp(&SortValue::Float(2.5))
        );
        assert_eq!(
            Ordering::Less,
            SortValue::Int(-3).total_cmp(&SortValue::Float(-2.5))
        );
        assert_eq!(
            Ordering::Less,
            SortValue::Int(i64::MAX).total_cmp(&SortValue::Float(f64::NAN))
        );
        assert_eq!(
            Ordering::Greater,
            SortValue::Int(0).total_cmp(&SortValue::Float(f64::NEG_INFINITY))
        );
    }

    #[test]
    fn shard_request_covers_window() {
        let mut req = SearchRequest::new("db", "space");
        req.from = 10;
        req.size = 5;
        let shard = req.for_shards();
        assert_eq!(0, shard.from);
        assert_eq!(15, shard.size);
    }
}
