//! Core handler service.
//!
//! [`HandlerService<F, R, T>`] wraps a single handler and implements
//! `tower::Service<Arc<HandlerContext>>`. Filtering and other cross-cutting
//! concerns are ordinary tower [`Layer`](tower::Layer)s stacked on top.

use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tower::{BoxError, Service};
use tracing::{debug, error};

use roost_core::Message;

use super::traits::Handler;
use crate::context::HandlerContext;

// ============================================================================
// HandlerResponse
// ============================================================================

/// Types that can be returned from handlers.
///
/// Text and messages are appended to the event's reply buffer; they are sent
/// when the dispatcher flushes it.
#[async_trait]
pub trait HandlerResponse: Send + 'static {
    async fn process_response(self, ctx: &HandlerContext);
}

#[async_trait]
impl HandlerResponse for () {
    async fn process_response(self, _ctx: &HandlerContext) {}
}

#[async_trait]
impl HandlerResponse for String {
    async fn process_response(self, ctx: &HandlerContext) {
        if !self.is_empty() {
            ctx.reply().write(self);
        }
    }
}

#[async_trait]
impl HandlerResponse for &'static str {
    async fn process_response(self, ctx: &HandlerContext) {
        if !self.is_empty() {
            ctx.reply().write(self);
        }
    }
}

#[async_trait]
impl HandlerResponse for Message {
    async fn process_response(self, ctx: &HandlerContext) {
        ctx.reply().write_message(self);
    }
}

/// `None` produces no reply.
#[async_trait]
impl<T: HandlerResponse> HandlerResponse for Option<T> {
    async fn process_response(self, ctx: &HandlerContext) {
        if let Some(t) = self {
            t.process_response(ctx).await;
        }
    }
}

/// On `Err` the error is logged and nothing is replied.
#[async_trait]
impl<T: HandlerResponse, E: std::fmt::Display + Send + 'static> HandlerResponse for Result<T, E> {
    async fn process_response(self, ctx: &HandlerContext) {
        match self {
            Ok(t) => t.process_response(ctx).await,
            Err(e) => {
                error!(
                    plugin = %ctx.plugin_name(),
                    conversation = %ctx.execution().conversation_id,
                    "Handler error: {e}"
                );
            }
        }
    }
}

// ============================================================================
// HandlerService
// ============================================================================

/// A tower [`Service`] that calls a single handler.
///
/// ```rust,ignore
/// let svc = HandlerService::new(my_handler);
/// let filtered = on_group().service(svc);
/// ```
pub struct HandlerService<F, R, T> {
    handler: F,
    _marker: PhantomData<fn() -> (R, T)>,
}

impl<F, R, T> HandlerService<F, R, T> {
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<F: Clone, R, T> Clone for HandlerService<F, R, T> {
    fn clone(&self) -> Self {
        HandlerService {
            handler: self.handler.clone(),
            _marker: PhantomData,
        }
    }
}

impl<F, R, T> From<F> for HandlerService<F, R, T> {
    fn from(handler: F) -> Self {
        HandlerService::new(handler)
    }
}

impl<F, R, T> Service<Arc<HandlerContext>> for HandlerService<F, R, T>
where
    F: Handler<R, T>,
    R: HandlerResponse,
{
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<HandlerContext>) -> Self::Future {
        let handler = self.handler.clone();
        async move {
            match handler.call(Arc::clone(&ctx)).await {
                Ok(r) => r.process_response(&ctx).await,
                Err(e) => debug!(plugin = %ctx.plugin_name(), error = %e, "Handler skipped"),
            }
            Ok(())
        }
        .boxed()
    }
}
