//! Filters and completion layers for handler chains.
//!
//! ```text
//! on_prefix("/ping")       ← when(): reject with EventSkipped unless matched
//!     .finish()            ← CompleteLayer: flush and close the reply buffer
//!     .handler(ping)       ← HandlerService
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::filter::{FilterLayer, Predicate};
use tower::{BoxError, Layer, Service, ServiceBuilder};
use tower_layer::Stack;
use tracing::trace;

use super::service::{HandlerResponse, HandlerService};
use super::traits::Handler;
use crate::context::HandlerContext;
use crate::error::EventSkipped;

// ============================================================================
// Filter
// ============================================================================

/// Matches events with a synchronous test over the [`HandlerContext`].
#[derive(Clone)]
pub struct EventFilter(Arc<dyn Fn(&HandlerContext) -> bool + Send + Sync>);

impl EventFilter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&HandlerContext) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl Predicate<Arc<HandlerContext>> for EventFilter {
    type Request = Arc<HandlerContext>;

    fn check(&mut self, ctx: Arc<HandlerContext>) -> Result<Arc<HandlerContext>, BoxError> {
        if (self.0)(&ctx) {
            Ok(ctx)
        } else {
            Err(Box::new(EventSkipped))
        }
    }
}

// ============================================================================
// Completion
// ============================================================================

/// What happens to the event once the wrapped handler has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Later handlers and plugins are skipped; replies flush at the end of
    /// dispatch as usual.
    Block,
    /// Pending replies are sent right away and the buffer is closed, which
    /// also ends propagation.
    Finish,
}

/// Applies a [`Completion`] after a successful call.
///
/// Errors, including [`EventSkipped`] from a filter below, pass through
/// untouched, so a handler that did not match never ends the chain.
#[derive(Debug, Clone, Copy)]
pub struct CompleteLayer(Completion);

impl CompleteLayer {
    pub fn new(mode: Completion) -> Self {
        Self(mode)
    }
}

impl<S> Layer<S> for CompleteLayer {
    type Service = CompleteService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompleteService {
            mode: self.0,
            inner,
        }
    }
}

#[derive(Clone)]
pub struct CompleteService<S> {
    mode: Completion,
    inner: S,
}

impl<S> Service<Arc<HandlerContext>> for CompleteService<S>
where
    S: Service<Arc<HandlerContext>, Response = (), Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, ctx: Arc<HandlerContext>) -> Self::Future {
        let mode = self.mode;
        let mut inner = self.inner.clone();
        async move {
            inner.call(Arc::clone(&ctx)).await?;
            let buffer = ctx.reply();
            // the handler may already have closed the buffer itself
            if buffer.is_finished() {
                return Ok(());
            }
            match mode {
                Completion::Block => ctx.stop_propagation(),
                Completion::Finish => {
                    let sent = buffer.close().await?;
                    trace!(plugin = ctx.plugin_name(), sent, "Reply closed by handler chain");
                }
            }
            Ok(())
        }
        .boxed()
    }
}

// ============================================================================
// ServiceBuilderExt
// ============================================================================

/// Handler-oriented methods for [`tower::ServiceBuilder`].
pub trait ServiceBuilderExt<L> {
    /// Wraps `handler` in a [`HandlerService`] and applies the stacked layers.
    fn handler<F, R, T>(self, handler: F) -> L::Service
    where
        F: Handler<R, T>,
        R: HandlerResponse,
        L: Layer<HandlerService<F, R, T>>;

    /// Only lets through events for which `predicate` holds.
    fn when<F>(self, predicate: F) -> ServiceBuilder<Stack<FilterLayer<EventFilter>, L>>
    where
        F: Fn(&HandlerContext) -> bool + Send + Sync + 'static;

    /// Stops propagation once the handler below has succeeded.
    fn block(self) -> ServiceBuilder<Stack<CompleteLayer, L>>;

    /// Sends the handler's replies immediately and closes the buffer.
    fn finish(self) -> ServiceBuilder<Stack<CompleteLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn handler<F, R, T>(self, handler: F) -> L::Service
    where
        F: Handler<R, T>,
        R: HandlerResponse,
        L: Layer<HandlerService<F, R, T>>,
    {
        self.service(HandlerService::new(handler))
    }

    fn when<F>(self, predicate: F) -> ServiceBuilder<Stack<FilterLayer<EventFilter>, L>>
    where
        F: Fn(&HandlerContext) -> bool + Send + Sync + 'static,
    {
        self.filter(EventFilter::new(predicate))
    }

    fn block(self) -> ServiceBuilder<Stack<CompleteLayer, L>> {
        self.layer(CompleteLayer::new(Completion::Block))
    }

    fn finish(self) -> ServiceBuilder<Stack<CompleteLayer, L>> {
        self.layer(CompleteLayer::new(Completion::Finish))
    }
}

#[cfg(test)]
mod tests {
    use roost_core::{MessageEvent, ReplyTarget};

    use super::*;
    use crate::extractor::Reply;
    use crate::locator::ServiceRegistry;
    use crate::plugin::Plugin;
    use crate::routing::{on_message, on_prefix};
    use crate::testing::TestHarness;

    async fn pong() -> String {
        "pong".to_string()
    }

    async fn echo(event: crate::extractor::Event) -> String {
        format!("echo {}", event.plain_text())
    }

    async fn closes_itself(reply: Reply) {
        reply.finish("closed").await.unwrap();
    }

    fn target() -> ReplyTarget {
        ReplyTarget::Private("u".into())
    }

    #[tokio::test]
    async fn finish_sends_before_dispatch_ends_and_skips_the_rest() {
        let ping = Plugin::builder("ping")
            .handler(on_prefix("/ping").finish().handler(pong))
            .handler(on_message().handler(echo))
            .build();
        let tail = Plugin::builder("tail").handler(on_message().handler(echo)).build();
        let h = TestHarness::new(vec![ping, tail], ServiceRegistry::new()).unwrap();

        h.send(MessageEvent::private(1, "u", "/ping")).await.unwrap();
        assert_eq!(h.transport.texts_for(&target()), vec!["pong"]);

        h.transport.clear();
        h.send(MessageEvent::private(2, "u", "hello")).await.unwrap();
        assert_eq!(
            h.transport.texts_for(&target()),
            vec!["echo hello", "echo hello"]
        );
    }

    #[tokio::test]
    async fn block_keeps_replies_buffered_until_dispatch_ends() {
        let a = Plugin::builder("a")
            .handler(on_message().block().handler(pong))
            .build();
        let b = Plugin::builder("b").handler(on_message().handler(echo)).build();
        let h = TestHarness::new(vec![a, b], ServiceRegistry::new()).unwrap();

        h.send(MessageEvent::private(1, "u", "hi")).await.unwrap();
        assert_eq!(h.transport.texts_for(&target()), vec!["pong"]);
    }

    #[tokio::test]
    async fn completion_respects_a_buffer_closed_by_the_handler() {
        let a = Plugin::builder("a")
            .handler(on_message().finish().handler(closes_itself))
            .handler(on_message().handler(echo))
            .build();
        let h = TestHarness::new(vec![a], ServiceRegistry::new()).unwrap();

        h.send(MessageEvent::private(1, "u", "hi")).await.unwrap();
        assert_eq!(h.transport.texts_for(&target()), vec!["closed"]);
    }
}
