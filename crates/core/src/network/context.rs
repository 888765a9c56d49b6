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
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation scope of one call, optionally bounded by a deadline.
///
/// Contexts form a tree: a derived context is cancelled together with its parent, and never
/// outlives the parent's deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derives a context that ends after `timeout`. Dropping the returned guard cancels the
    /// derived context, which releases its timer.
    pub fn with_timeout(&self, timeout: Duration) -> (CallContext, DropGuard) {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        let token = self.token.child_token();
        (
            CallContext {
                token: token.clone(),
                deadline: Some(deadline),
            },
            token.drop_guard(),
        )
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, `None` when the context has none.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resolves once the context is cancelled or its deadline passed.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Runs `future` until it completes or the context ends, whichever happens first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, ContextError> {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            output = future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test(start_paused = true))]
    async fn deadline_ends_the_call() {
        let (ctx, _guard) = CallContext::background().with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(Err(ContextError::DeadlineExceeded), result);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn child_never_outlives_parent() {
        let (parent, _parent_guard) =
            CallContext::background().with_timeout(Duration::from_millis(10));
        let (child, _child_guard) = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(parent.deadline(), child.deadline());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test_log::test(tokio::test)]
    async fn dropping_the_guard_releases_the_context() {
        let (ctx, guard) = CallContext::background().with_timeout(Duration::from_secs(60));
        assert!(!ctx.is_cancelled());
        drop(guard);
        assert!(ctx.is_cancelled());
        assert_eq!(Err(ContextError::Cancelled), ctx.run(async { 1 }).await);
    }
}
