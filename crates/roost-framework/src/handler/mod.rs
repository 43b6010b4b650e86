//! Handlers and the tower plumbing around them.
//!
//! - [`traits`]: the [`Handler`] trait, implemented for async functions whose
//!   parameters are extractors.
//! - [`service`]: [`HandlerService`], which adapts a handler to
//!   `tower::Service<Arc<HandlerContext>>`, and [`HandlerResponse`].
//! - [`builder`]: the [`EventFilter`] predicate, [`CompleteLayer`] and
//!   [`ServiceBuilderExt`].
//!
//! [`HandlerContext`]: crate::context::HandlerContext

pub mod builder;
pub mod service;
pub mod traits;

pub use builder::{CompleteLayer, CompleteService, Completion, EventFilter, ServiceBuilderExt};
pub use service::{HandlerResponse, HandlerService};
pub use traits::Handler;

pub use tower::Layer;
