//! Pre-filtered [`ServiceBuilder`]s for common event shapes.
//!
//! A non-matching event is rejected with [`EventSkipped`](crate::EventSkipped),
//! which the dispatcher ignores silently.
//!
//! ```rust,ignore
//! let svc = on_prefix("!echo ").handler(echo);
//! ```

use tower::ServiceBuilder;
use tower::filter::FilterLayer;
use tower_layer::{Identity, Stack};

use crate::context::HandlerContext;
use crate::handler::{EventFilter, ServiceBuilderExt};

/// The builder returned by the `on_*` helpers.
pub type FilterServiceBuilder = ServiceBuilder<Stack<FilterLayer<EventFilter>, Identity>>;

/// Events matching `predicate`.
pub fn on<F>(predicate: F) -> FilterServiceBuilder
where
    F: Fn(&HandlerContext) -> bool + Send + Sync + 'static,
{
    ServiceBuilder::new().when(predicate)
}

/// Every message.
pub fn on_message() -> FilterServiceBuilder {
    on(|_| true)
}

/// Group messages only.
pub fn on_group() -> FilterServiceBuilder {
    on(|ctx| ctx.event().is_group())
}

/// Private messages only.
pub fn on_private() -> FilterServiceBuilder {
    on(|ctx| !ctx.event().is_group())
}

/// Messages whose plain text starts with `prefix`.
pub fn on_prefix(prefix: impl Into<String>) -> FilterServiceBuilder {
    let prefix = prefix.into();
    on(move |ctx| ctx.event().plain_text().starts_with(&prefix))
}
