// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

/// Why an isolated task did not produce its value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task '{name}' panicked: {message}")]
    Panicked { name: &'static str, message: String },
    #[error("task '{name}' was cancelled")]
    Cancelled { name: &'static str },
    #[error("task '{name}' was aborted")]
    Aborted { name: &'static str },
}

/// Renders the payload of a caught panic.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

/// Polls `future` to completion, turning a panic into an error carrying the panic message.
pub async fn catch_panic<F: Future>(future: F) -> Result<F::Output, String> {
    // We use AssertUnwindSafe here so that the wrapped future doesn't need to be UnwindSafe.
    // Nothing touched by the future is used after unwinding.
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(payload.as_ref()))
}

/// Spawns `future` on the current runtime. A panic inside the task is caught and reported through
/// the returned handle rather than being lost with the task.
pub fn spawn_isolated<F>(name: &'static str, future: F) -> TaskHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let cancellation_token = CancellationToken::new();
    let token = cancellation_token.clone();
    let inner_handle = tokio::spawn(async move {
        tokio::select! {
            result = catch_panic(future) => Some(result),
            _ = token.cancelled() => None,
        }
    });

    TaskHandle {
        name,
        cancellation_token,
        inner_handle,
    }
}

/// Handle to a task spawned with [`spawn_isolated`]. Awaiting it yields the task's output or
/// the reason it has none.
pub struct TaskHandle<T> {
    name: &'static str,
    cancellation_token: CancellationToken,
    inner_handle: tokio::task::JoinHandle<Option<Result<T, String>>>,
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Abort the task immediately. This will abort the task at the next yielding point.
    pub fn abort(&self) {
        self.inner_handle.abort();
    }

    /// Trigger graceful cancellation of the task
    pub fn cancel(&self) {
        self.cancellation_token.cancel()
    }

    /// Returns true if the task has finished executing.
    pub fn is_finished(&self) -> bool {
        self.inner_handle.is_finished()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let name = self.name;
        let result = match ready!(self.inner_handle.poll_unpin(cx)) {
            Ok(Some(Ok(value))) => Ok(value),
            Ok(Some(Err(message))) => Err(TaskError::Panicked { name, message }),
            Ok(None) => Err(TaskError::Cancelled { name }),
            Err(_) => Err(TaskError::Aborted { name }),
        };
        Poll::Ready(result)
    }
}
