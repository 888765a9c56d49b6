// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::error;

use tessera_core::{catch_panic, spawn_isolated, TaskHandle};
use tessera_types::query::Document;

use crate::error::QueryError;

enum Item {
    Doc(Document),
    Failed(QueryError),
    End,
}

/// Documents of a streamed query, in the order they were produced.
///
/// The stream yields `Ok` documents until the producer marks the end, after which it returns
/// `None`. A producer failure is yielded once as `Err` and terminates the stream. A producer that
/// disappears without marking the end yields [`QueryError::StreamClosed`].
pub struct DocStream {
    rx: mpsc::Receiver<Item>,
    done: bool,
    // the producer stops on its own once it notices the consumer is gone
    _producer: Option<TaskHandle<()>>,
}

/// Producing half of a [`DocStream`].
#[derive(Clone)]
pub struct DocStreamWriter {
    tx: mpsc::Sender<Item>,
}

impl DocStream {
    pub fn channel(buffer: usize) -> (DocStreamWriter, DocStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            DocStreamWriter { tx },
            DocStream {
                rx,
                done: false,
                _producer: None,
            },
        )
    }

    /// Runs `producer` on its own task, feeding the returned stream. A producer that panics
    /// fails the stream with [`QueryError::Panicked`] naming `sender`.
    pub fn spawn<F, Fut>(
        name: &'static str,
        sender: impl Into<String>,
        buffer: usize,
        producer: F,
    ) -> DocStream
    where
        F: FnOnce(DocStreamWriter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (writer, mut stream) = Self::channel(buffer);
        let sender = sender.into();
        let reporter = writer.clone();
        let producer = producer(writer);

        stream._producer = Some(spawn_isolated(name, async move {
            if let Err(message) = catch_panic(producer).await {
                error!(%sender, %message, "Stream producer panicked");
                reporter
                    .fail(QueryError::Panicked { sender, message })
                    .await;
            }
        }));
        stream
    }

    /// A stream that fails right away.
    pub fn failed(err: QueryError) -> DocStream {
        let (writer, stream) = Self::channel(1);
        // the buffer has room for this one item
        let _ = writer.tx.try_send(Item::Failed(err));
        stream
    }
}

impl DocStreamWriter {
    /// Fails once the consumer went away.
    pub async fn send(&self, doc: Document) -> Result<(), QueryError> {
        self.tx
            .send(Item::Doc(doc))
            .await
            .map_err(|_| QueryError::StreamClosed)
    }

    pub async fn fail(self, err: QueryError) {
        let _ = self.tx.send(Item::Failed(err)).await;
    }

    pub async fn finish(self) {
        let _ = self.tx.send(Item::End).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Stream for DocStream {
    type Item = Result<Document, QueryError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        let item = match self.rx.poll_recv(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(item) => item,
        };
        Poll::Ready(match item {
            Some(Item::Doc(doc)) => Some(Ok(doc)),
            Some(Item::End) => {
                self.done = true;
                None
            }
            Some(Item::Failed(err)) => {
                self.done = true;
                Some(Err(err))
            }
            None => {
                self.done = true;
                Some(Err(QueryError::StreamClosed))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::StreamExt;
    use googletest::prelude::*;

    #[test_log::test(tokio::test)]
    async fn end_marker_terminates_once() {
        let (writer, mut stream) = DocStream::channel(4);
        writer.send(Document::new("a")).await.unwrap();
        writer.clone().finish().await;
        // anything after the end marker is ignored
        writer.send(Document::new("late")).await.unwrap();

        assert_that!(stream.next().await.map(|r| r.unwrap().id), some(eq("a")));
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn panicking_producer_fails_the_stream() {
        let mut stream = DocStream::spawn("test-stream", "shard-0", 4, |writer| async move {
            if writer.send(Document::new("a")).await.is_ok() {
                panic!("producer exploded");
            }
        });

        assert!(matches!(stream.next().await, Some(Ok(doc)) if doc.id == "a"));
        assert!(matches!(
            stream.next().await,
            Some(Err(QueryError::Panicked { sender, message }))
                if sender == "shard-0" && message.contains("producer exploded")
        ));
        assert!(stream.next().await.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn vanished_producer_is_an_error() {
        let (writer, mut stream) = DocStream::channel(4);
        writer.send(Document::new("a")).await.unwrap();
        drop(writer);

        assert!(matches!(stream.next().await, Some(Ok(_))));
        assert!(matches!(
            stream.next().await,
            Some(Err(QueryError::StreamClosed))
        ));
        assert!(stream.next().await.is_none());
    }
}
