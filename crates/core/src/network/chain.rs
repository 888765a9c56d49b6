// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use enumset::EnumSet;
use tracing::{debug, error};

use tessera_types::net::ServicePath;

use super::{HandlerError, RpcRequest, RpcResponse};
use crate::{catch_panic, panic_message};

/// One step of a dispatch chain.
///
/// `S` is per-call state shared by the handlers of one chain, e.g. the partition store resolved
/// by an earlier handler.
#[async_trait]
pub trait Handler<S>: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Operations this handler can serve. Checked when the chain is composed.
    fn operations(&self) -> EnumSet<ServicePath> {
        EnumSet::all()
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        resp: &mut RpcResponse,
        scope: &mut S,
    ) -> Result<(), HandlerError>;
}

/// Shapes the error that halted a chain before it is reported.
pub trait ErrorTransform<S>: Send + Sync + 'static {
    /// Either absorbs `err` into `resp` and returns `Ok(())`, or returns the error that is to be
    /// reported, which may be `err` itself.
    fn transform(
        &self,
        err: HandlerError,
        req: &RpcRequest,
        resp: &mut RpcResponse,
        scope: &S,
    ) -> Result<(), HandlerError>;
}

static_assertions::assert_obj_safe!(Handler<()>, ErrorTransform<()>);

/// Process wide flag that is raised once the server starts shutting down.
#[derive(Debug, Clone, Default)]
pub struct StoppingFlag(Arc<AtomicBool>);

impl StoppingFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// First handler of every chain. Refuses work while stopping and derives the call deadline.
#[derive(Debug, Clone)]
pub struct InitHandler {
    stopping: StoppingFlag,
}

impl InitHandler {
    pub fn new(stopping: StoppingFlag) -> Self {
        Self { stopping }
    }

    /// Admits `req` for processing. Services that do not run through a [`Chain`] call this
    /// directly.
    pub fn admit(&self, req: &mut RpcRequest) -> Result<(), HandlerError> {
        if self.stopping.is_stopping() {
            return Err(HandlerError::ServiceUnavailable);
        }
        if let Some(timeout) = req.timeout {
            let (ctx, release) = req.context().with_timeout(timeout);
            req.set_context(ctx, Some(release));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Send + 'static> Handler<S> for InitHandler {
    fn name(&self) -> &'static str {
        "init"
    }

    async fn execute(
        &self,
        req: &mut RpcRequest,
        _resp: &mut RpcResponse,
        _scope: &mut S,
    ) -> Result<(), HandlerError> {
        self.admit(req)
    }
}

pub struct ChainBuilder<S> {
    path: ServicePath,
    handlers: Vec<Box<dyn Handler<S>>>,
    transform: Option<Box<dyn ErrorTransform<S>>>,
}

impl<S: Default + Send + 'static> ChainBuilder<S> {
    pub fn new(path: ServicePath, init: InitHandler) -> Self {
        Self {
            path,
            handlers: vec![Box::new(init)],
            transform: None,
        }
    }

    /// Appends a handler. Panics if the handler cannot serve this chain's path.
    #[track_caller]
    pub fn handler<H: Handler<S>>(mut self, handler: H) -> Self {
        if !handler.operations().contains(self.path) {
            panic!(
                "Handler '{}' cannot serve {}, it handles {:?}",
                handler.name(),
                self.path,
                handler.operations()
            );
        }
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn error_transform<T: ErrorTransform<S>>(mut self, transform: T) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    pub fn build(self) -> Chain<S> {
        Chain {
            path: self.path,
            handlers: self.handlers,
            transform: self.transform,
        }
    }
}

/// Ordered handlers serving one [`ServicePath`]. The first failing handler halts the chain.
pub struct Chain<S> {
    path: ServicePath,
    handlers: Vec<Box<dyn Handler<S>>>,
    transform: Option<Box<dyn ErrorTransform<S>>>,
}

impl<S: Default + Send + 'static> Chain<S> {
    pub fn path(&self) -> ServicePath {
        self.path
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Runs the chain for `req`. Never panics and always releases the call context.
    pub async fn execute(&self, mut req: RpcRequest) -> RpcResponse {
        let mut resp = RpcResponse::new(req.message_id);
        let mut scope = S::default();

        if let Err(err) = self.run_handlers(&mut req, &mut resp, &mut scope).await {
            if let Err(err) = self.transform_error(err, &req, &mut resp, &scope) {
                debug!(
                    path = %self.path,
                    message_id = %req.message_id,
                    %err,
                    "Request failed"
                );
                resp.fail(&err);
            }
        }

        req.release();
        resp
    }

    async fn run_handlers(
        &self,
        req: &mut RpcRequest,
        resp: &mut RpcResponse,
        scope: &mut S,
    ) -> Result<(), HandlerError> {
        for handler in &self.handlers {
            // handlers may replace the context, so it is looked up per step
            let ctx = req.context().clone();
            match catch_panic(ctx.run(handler.execute(req, resp, scope))).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => return Err(err),
                Ok(Err(ctx_err)) => return Err(ctx_err.into()),
                Err(message) => {
                    error!(
                        path = %self.path,
                        handler = handler.name(),
                        "Handler panicked: {}",
                        message
                    );
                    return Err(HandlerError::Panicked {
                        handler: handler.name(),
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    fn transform_error(
        &self,
        err: HandlerError,
        req: &RpcRequest,
        resp: &mut RpcResponse,
        scope: &S,
    ) -> Result<(), HandlerError> {
        let Some(transform) = &self.transform else {
            return Err(err);
        };
        std::panic::catch_unwind(AssertUnwindSafe(|| transform.transform(err, req, resp, scope)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(path = %self.path, "Error transform panicked: {}", message);
                Err(HandlerError::Panicked {
                    handler: "error-transform",
                    message,
                })
            })
    }
}
