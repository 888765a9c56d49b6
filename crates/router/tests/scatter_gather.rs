// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::result::Result;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use googletest::prelude::*;

use tessera_core::network::{CallContext, ContextError};
use tessera_router::{DocStream, MultiSender, QueryError, SearchSender};
use tessera_types::errors::codes;
use tessera_types::query::{
    DeleteByQueryResponse, Document, MergeError, SearchRequest, SearchResponse, SearchResponses,
    SortField, SortOrder, SortValue,
};

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Succeed,
    Panic,
    Fail,
    /// Answers successfully, but the response itself reports a failed shard.
    EmbeddedError,
    /// Answers with its documents in stored order.
    Unsorted,
}

#[derive(Clone)]
struct FakeSender {
    name: String,
    delay: Duration,
    docs: Vec<Document>,
    behavior: Behavior,
}

impl FakeSender {
    fn new(name: impl Into<String>, docs: Vec<Document>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            docs,
            behavior: Behavior::Succeed,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn behaving(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn arc(self) -> Arc<dyn SearchSender> {
        Arc::new(self)
    }

    async fn respond(&self, request: &SearchRequest) -> Result<SearchResponse, QueryError> {
        tokio::time::sleep(self.delay).await;
        match self.behavior {
            Behavior::Panic => panic!("{} exploded", self.name),
            Behavior::Fail => Err(QueryError::Remote {
                sender: self.name.clone(),
                status: codes::INTERNAL_ERROR,
                message: "disk on fire".to_owned(),
            }),
            Behavior::EmbeddedError => Ok(SearchResponse::failed(
                &request.db_name,
                &request.space_name,
                codes::TIMEOUT,
                "shard timed out",
            )),
            Behavior::Unsorted => Ok(SearchResponse::new(&request.db_name, &request.space_name)
                .with_hits(self.docs.clone())),
            Behavior::Succeed => {
                let order = request.sort_order()?;
                let mut response = SearchResponse::new(&request.db_name, &request.space_name)
                    .with_hits(self.docs.clone());
                response.normalize(&order, request.window());
                Ok(response)
            }
        }
    }
}

#[async_trait]
impl SearchSender for FakeSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, QueryError> {
        self.respond(request).await
    }

    async fn msearch(&self, requests: &[SearchRequest]) -> Result<SearchResponses, QueryError> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(self.respond(request).await?);
        }
        Ok(responses)
    }

    async fn delete_by_query(
        &self,
        request: &SearchRequest,
    ) -> Result<DeleteByQueryResponse, QueryError> {
        let response = self.respond(request).await?;
        Ok(DeleteByQueryResponse::deleted(response.total))
    }

    fn stream_search(&self, _request: &SearchRequest, _ctx: CallContext) -> DocStream {
        let this = self.clone();
        DocStream::spawn("fake-stream", self.name.clone(), 1, |writer| async move {
            for doc in this.docs {
                tokio::time::sleep(this.delay).await;
                if writer.send(doc).await.is_err() {
                    return;
                }
            }
            match this.behavior {
                Behavior::Fail => {
                    writer
                        .fail(QueryError::Remote {
                            sender: this.name,
                            status: codes::INTERNAL_ERROR,
                            message: "stream broke".to_owned(),
                        })
                        .await
                }
                Behavior::Panic => panic!("{} stream exploded", this.name),
                _ => writer.finish().await,
            }
        })
    }
}

fn scored(id: String, score: f64) -> Document {
    Document::new(id).with_score(score)
}

/// Disjoint documents per sender with scores that interleave across senders.
fn shard_docs(shard: usize) -> Vec<Document> {
    (0..6)
        .map(|j| scored(format!("s{shard}-d{j}"), ((shard * 7 + j * 13) % 20) as f64))
        .collect()
}

fn ids(docs: &[Document]) -> Vec<String> {
    docs.iter().map(|doc| doc.id.clone()).collect()
}

#[test_log::test(tokio::test(start_paused = true))]
async fn search_returns_global_top_in_any_completion_order() -> anyhow::Result<()> {
    let mut union: Vec<_> = (0..4).flat_map(shard_docs).collect();
    let order = SortOrder::by_score();
    union.sort_by(|a, b| order.compare(a, b));

    for delays in [[1, 2, 3, 4], [4, 3, 2, 1], [2, 4, 1, 3], [3, 3, 3, 3]] {
        let senders = (0..4)
            .map(|shard| {
                FakeSender::new(format!("shard-{shard}"), shard_docs(shard))
                    .delayed(Duration::from_millis(delays[shard] * 10))
                    .arc()
            })
            .collect();
        let multi = MultiSender::new("books", senders);

        let mut request = SearchRequest::new("db", "books");
        request.size = 5;
        let response = multi.search(&request).await?;
        assert_that!(ids(&response.hits), eq(ids(&union[..5])));
        assert_that!(response.total, eq(24));

        request.from = 5;
        request.size = 4;
        let response = multi.search(&request).await?;
        assert_that!(ids(&response.hits), eq(ids(&union[5..9])));
    }
    Ok(())
}

#[test_log::test(tokio::test)]
async fn search_by_field_ascending() -> anyhow::Result<()> {
    let price = |id: &str, price: i64| {
        Document::new(id).with_sort_values(vec![SortValue::Int(price)])
    };
    let multi = MultiSender::new(
        "books",
        vec![
            FakeSender::new("a", vec![price("a1", 30), price("a2", 5)]).arc(),
            FakeSender::new("b", vec![price("b1", 10), price("b2", 50)]).arc(),
        ],
    );

    let mut request = SearchRequest::new("db", "books");
    request.sort = vec![SortField::asc("price")];
    request.size = 3;
    let response = multi.search(&request).await?;
    assert_that!(
        ids(&response.hits),
        elements_are![eq("a2"), eq("b1"), eq("a1")]
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn nested_senders_compose() -> anyhow::Result<()> {
    let space_a = MultiSender::new(
        "db/a",
        vec![
            FakeSender::new("a0", vec![scored("a0".into(), 9.0), scored("a1".into(), 2.0)]).arc(),
            FakeSender::new("a1", vec![scored("a2".into(), 7.0)]).arc(),
        ],
    );
    let space_b = MultiSender::new(
        "db/b",
        vec![FakeSender::new("b0", vec![scored("b0".into(), 8.0), scored("b1".into(), 1.0)]).arc()],
    );
    let all = MultiSender::new("db", vec![Arc::new(space_a) as Arc<dyn SearchSender>, Arc::new(space_b)]);

    let mut request = SearchRequest::new("db", "*");
    request.from = 1;
    request.size = 2;
    let response = all.search(&request).await?;
    assert_that!(ids(&response.hits), elements_are![eq("b0"), eq("a2")]);
    assert_that!(response.total, eq(5));
    assert_that!(response.max_score, some(eq(9.0)));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn invalid_sort_is_rejected_before_fan_out() {
    let multi = MultiSender::new("books", vec![FakeSender::new("a", vec![]).arc()]);
    let mut request = SearchRequest::new("db", "books");
    request.sort = vec![SortField::asc("price"), SortField::desc("price")];

    let err = multi.search(&request).await.unwrap_err();
    assert_that!(err.status(), eq(codes::BAD_REQUEST));
}

#[test_log::test(tokio::test)]
async fn empty_sender_group() {
    let multi = MultiSender::new("nothing", vec![]);
    let request = SearchRequest::new("db", "books");
    assert!(matches!(
        multi.search(&request).await,
        Err(QueryError::NoSenders)
    ));
    assert!(matches!(
        multi.stream_search(&request, CallContext::background()).next().await,
        Some(Err(QueryError::NoSenders))
    ));
}

fn with_panicking_second(delay_of_panic: u64) -> MultiSender {
    MultiSender::new(
        "books",
        vec![
            FakeSender::new("good-0", shard_docs(0))
                .delayed(Duration::from_millis(20))
                .arc(),
            FakeSender::new("bad", shard_docs(1))
                .delayed(Duration::from_millis(delay_of_panic))
                .behaving(Behavior::Panic)
                .arc(),
            FakeSender::new("good-2", shard_docs(2))
                .delayed(Duration::from_millis(10))
                .arc(),
        ],
    )
}

#[test_log::test(tokio::test(start_paused = true))]
async fn panicking_sender_fails_the_call_explicitly() {
    for delay in [0, 15, 30] {
        let multi = with_panicking_second(delay);
        let request = SearchRequest::new("db", "books");

        let err = multi.search(&request).await.unwrap_err();
        assert!(
            matches!(&err, QueryError::Panicked { sender, message } if sender == "bad" && message == "bad exploded"),
            "unexpected search error {err}"
        );

        let err = multi
            .msearch(&[request.clone(), request.clone()])
            .await
            .unwrap_err();
        assert!(matches!(&err, QueryError::Panicked { sender, .. } if sender == "bad"));

        let err = multi.delete_by_query(&request).await.unwrap_err();
        assert!(matches!(&err, QueryError::Panicked { sender, .. } if sender == "bad"));
        assert_that!(err.status(), eq(codes::INTERNAL_ERROR));
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn delete_by_query_reports_the_failure_wherever_it_is() {
    for failing in 0..4 {
        let senders = (0..4)
            .map(|shard| {
                let sender = FakeSender::new(format!("shard-{shard}"), shard_docs(shard))
                    .delayed(Duration::from_millis(10 * (4 - shard as u64)));
                if shard == failing {
                    sender.behaving(Behavior::Fail).arc()
                } else {
                    sender.arc()
                }
            })
            .collect();
        let multi = MultiSender::new("books", senders);

        let err = multi
            .delete_by_query(&SearchRequest::new("db", "books"))
            .await
            .unwrap_err();
        let expected = format!("shard-{failing}");
        assert!(
            matches!(&err, QueryError::Remote { sender, message, .. } if *sender == expected && message == "disk on fire"),
            "unexpected error {err}"
        );
    }
}

#[test_log::test(tokio::test)]
async fn delete_by_query_success() -> anyhow::Result<()> {
    let multi = MultiSender::new(
        "books",
        vec![
            FakeSender::new("a", shard_docs(0)).arc(),
            FakeSender::new("b", shard_docs(1)).arc(),
        ],
    );
    let response = multi
        .delete_by_query(&SearchRequest::new("db", "books"))
        .await?;
    assert!(response.is_success());
    assert_that!(response.deleted, eq(6));
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn msearch_rejects_a_failed_baseline() {
    // the failed shard answers first and would become the merge baseline
    let multi = MultiSender::new(
        "books",
        vec![
            FakeSender::new("late", shard_docs(0))
                .delayed(Duration::from_millis(50))
                .arc(),
            FakeSender::new("broken", vec![])
                .behaving(Behavior::EmbeddedError)
                .arc(),
        ],
    );
    let request = SearchRequest::new("db", "books");

    let err = multi.msearch(&[request]).await.unwrap_err();
    match err {
        QueryError::Merge { sender, source } => {
            assert_that!(sender, eq("broken"));
            assert!(matches!(
                source,
                MergeError::Shard { status, .. } if status == codes::TIMEOUT
            ));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn msearch_merges_each_request_on_its_own() -> anyhow::Result<()> {
    let multi = MultiSender::new(
        "books",
        vec![
            FakeSender::new("a", shard_docs(0))
                .delayed(Duration::from_millis(5))
                .arc(),
            FakeSender::new("b", shard_docs(1)).arc(),
        ],
    );
    let mut first = SearchRequest::new("db", "books");
    first.size = 1;
    let mut second = SearchRequest::new("db", "books");
    second.from = 2;
    second.size = 3;

    let mut union: Vec<_> = shard_docs(0).into_iter().chain(shard_docs(1)).collect();
    let order = SortOrder::by_score();
    union.sort_by(|a, b| order.compare(a, b));

    let responses = multi.msearch(&[first, second]).await?;
    assert_that!(responses.len(), eq(2));
    assert_that!(ids(&responses[0].hits), eq(ids(&union[..1])));
    assert_that!(ids(&responses[1].hits), eq(ids(&union[2..5])));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn msearch_orders_a_single_sender_answer() -> anyhow::Result<()> {
    let multi = MultiSender::new(
        "books",
        vec![FakeSender::new(
            "a",
            vec![scored("low".into(), 0.1), scored("high".into(), 0.9)],
        )
        .behaving(Behavior::Unsorted)
        .arc()],
    );
    let mut request = SearchRequest::new("db", "books");
    request.size = 1;

    let responses = multi.msearch(&[request]).await?;
    assert_that!(ids(&responses[0].hits), elements_are![eq("high")]);
    assert_that!(responses[0].max_score, some(eq(0.9)));
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn stream_search_drains_senders_in_order() -> anyhow::Result<()> {
    let multi = MultiSender::new(
        "books",
        vec![
            FakeSender::new("a", vec![Document::new("a1"), Document::new("a2")])
                .delayed(Duration::from_millis(30))
                .arc(),
            FakeSender::new("b", vec![Document::new("b1")]).arc(),
        ],
    );

    let mut stream = multi.stream_search(&SearchRequest::new("db", "books"), CallContext::background());
    let mut seen = Vec::new();
    while let Some(doc) = stream.next().await {
        seen.push(doc?.id);
    }
    assert_that!(seen, elements_are![eq("a1"), eq("a2"), eq("b1")]);
    // the end marker is delivered exactly once
    assert!(stream.next().await.is_none());
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn stream_search_stops_at_the_first_error() {
    let multi = MultiSender::new(
        "books",
        vec![
            FakeSender::new("a", vec![Document::new("a1")])
                .behaving(Behavior::Fail)
                .arc(),
            FakeSender::new("b", vec![Document::new("b1")]).arc(),
        ],
    );

    let items: Vec<_> = multi
        .stream_search(&SearchRequest::new("db", "books"), CallContext::background())
        .collect()
        .await;
    assert_that!(items.len(), eq(2));
    assert!(matches!(&items[0], Ok(doc) if doc.id == "a1"));
    assert!(matches!(&items[1], Err(QueryError::Remote { message, .. }) if message == "stream broke"));
}

#[test_log::test(tokio::test)]
async fn stream_search_reports_a_panicking_sender() {
    let inner = MultiSender::new(
        "db/books",
        vec![FakeSender::new("shard-0", vec![Document::new("a1")])
            .behaving(Behavior::Panic)
            .arc()],
    );
    let multi = MultiSender::new(
        "db",
        vec![
            Arc::new(inner) as Arc<dyn SearchSender>,
            FakeSender::new("b", vec![Document::new("b1")]).arc(),
        ],
    );

    let items: Vec<_> = multi
        .stream_search(&SearchRequest::new("db", "books"), CallContext::background())
        .collect()
        .await;
    assert_that!(items.len(), eq(2));
    assert!(matches!(&items[0], Ok(doc) if doc.id == "a1"));
    assert!(matches!(
        &items[1],
        Err(QueryError::Panicked { sender, message })
            if sender == "shard-0" && message.contains("stream exploded")
    ));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn stream_search_ends_on_cancellation() {
    let multi = MultiSender::new(
        "books",
        vec![FakeSender::new("slow", vec![Document::new("a1"), Document::new("a2")])
            .delayed(Duration::from_secs(60))
            .arc()],
    );
    let ctx = CallContext::background();
    let mut stream = multi.stream_search(&SearchRequest::new("db", "books"), ctx.clone());

    ctx.cancel();
    assert!(matches!(
        stream.next().await,
        Some(Err(QueryError::Context(ContextError::Cancelled)))
    ));
    assert!(stream.next().await.is_none());
}
