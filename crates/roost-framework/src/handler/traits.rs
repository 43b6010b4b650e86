//! The [`Handler`] trait: async functions with injected parameters.
//!
//! It is implemented for every `async fn` (or closure returning a future)
//! whose parameters all implement [`FromContext`], similar to Axum:
//!
//! ```rust,ignore
//! async fn ping() -> &'static str {
//!     "pong"
//! }
//!
//! async fn echo(event: Event) -> String {
//!     event.plain_text()
//! }
//!
//! async fn start(event: Event, games: ServiceRef<PuzzleGames>, reply: Reply) {
//!     // ...
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::context::HandlerContext;
use crate::error::ExtractResult;
use crate::extractor::FromContext;

/// A callable that extracts its arguments from a [`HandlerContext`] and
/// produces an `R`.
///
/// `T` is the tuple of extractor types and only serves to keep the blanket
/// implementations apart.
pub trait Handler<R, T>: Clone + Send + Sync + 'static {
    /// Extracts the arguments and runs the handler.
    ///
    /// Fails without running it when any extractor fails.
    fn call(self, ctx: Arc<HandlerContext>) -> BoxFuture<'static, ExtractResult<R>>;
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Fut, R, $($ty,)*> Handler<R, ($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: Send + 'static,
            $( $ty: FromContext + Send + 'static, )*
        {
            fn call(self, ctx: Arc<HandlerContext>) -> BoxFuture<'static, ExtractResult<R>> {
                async move {
                    $(
                        let $ty = match $ty::from_context(&ctx) {
                            Ok(value) => value,
                            Err(e) => return Err(e),
                        };
                    )*
                    Ok((self)($($ty,)*).await)
                }
                .boxed()
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
