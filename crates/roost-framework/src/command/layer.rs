use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use clap::Parser;
use clap::error::ErrorKind;
use futures::FutureExt;
use futures::future::BoxFuture;
use tower::{BoxError, Layer, Service, ServiceBuilder};
use tower_layer::{Identity, Stack};
use tracing::debug;

use crate::access::BanList;
use crate::context::HandlerContext;
use crate::error::EventSkipped;
use crate::features::FeatureFlags;
use crate::handler::{Handler, HandlerResponse, HandlerService, ServiceBuilderExt};

use super::extractor::ParsedCommand;
use super::split::fragment_split;

pub const BANNED_REPLY: &str = "Your account is banned.";

/// Creates a [`CommandLayer`] for `/name`.
///
/// ```rust,ignore
/// on_command::<EchoCommand>("echo").handler(echo_handler);
///
/// on_command::<EchoCommand>("echo")
///     .reply_error(false)
///     .build()
///     .layer(some_other_layer)
///     .handler(echo_handler);
/// ```
pub fn on_command<T>(name: impl Into<String>) -> CommandLayer<T>
where
    T: Parser + Clone + Send + Sync + 'static,
{
    CommandLayer::new(name)
}

/// A tower [`Layer`] that parses messages as a clap command before calling
/// the inner service.
#[derive(Clone)]
pub struct CommandLayer<T>
where
    T: Parser + Clone + Send + Sync + 'static,
{
    names: Arc<[String]>,
    feature: Option<Arc<str>>,
    reply_help: bool,
    reply_error: bool,
    block: bool,
    check_bans: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CommandLayer<T>
where
    T: Parser + Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            names: Arc::from(vec![format!("/{}", name.into().to_lowercase())]),
            feature: None,
            reply_help: true,
            reply_error: true,
            block: true,
            check_bans: true,
            _marker: PhantomData,
        }
    }

    /// Also match `/alias`.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        let mut names = self.names.to_vec();
        names.push(format!("/{}", alias.into().to_lowercase()));
        self.names = Arc::from(names);
        self
    }

    /// Refuse the command while `feature` is disabled in [`FeatureFlags`].
    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(Arc::from(feature.into()));
        self
    }

    /// Enable/disable automatic help replies (default: `true`).
    pub fn reply_help(mut self, enabled: bool) -> Self {
        self.reply_help = enabled;
        self
    }

    /// Enable/disable automatic error replies (default: `true`).
    pub fn reply_error(mut self, enabled: bool) -> Self {
        self.reply_error = enabled;
        self
    }

    /// Enable/disable stopping propagation after a match (default: `true`).
    pub fn block(mut self, enabled: bool) -> Self {
        self.block = enabled;
        self
    }

    /// Enable/disable the [`BanList`] check (default: `true`).
    pub fn check_bans(mut self, enabled: bool) -> Self {
        self.check_bans = enabled;
        self
    }

    pub fn build(self) -> ServiceBuilder<Stack<CommandLayer<T>, Identity>> {
        ServiceBuilder::new().layer(self)
    }

    /// Shorthand for `.build().handler(handler)`.
    pub fn handler<H, R, U>(self, handler: H) -> CommandService<T, HandlerService<H, R, U>>
    where
        H: Handler<R, U>,
        R: HandlerResponse,
    {
        self.build().handler(handler)
    }
}

impl<T, S> Layer<S> for CommandLayer<T>
where
    T: Parser + Clone + Send + Sync + 'static,
{
    type Service = CommandService<T, S>;

    fn layer(&self, inner: S) -> CommandService<T, S> {
        CommandService {
            names: Arc::clone(&self.names),
            feature: self.feature.clone(),
            reply_help: self.reply_help,
            reply_error: self.reply_error,
            block: self.block,
            check_bans: self.check_bans,
            inner,
            _marker: PhantomData,
        }
    }
}

/// The [`Service`] produced by [`CommandLayer`].
pub struct CommandService<T, S> {
    names: Arc<[String]>,
    feature: Option<Arc<str>>,
    reply_help: bool,
    reply_error: bool,
    block: bool,
    check_bans: bool,
    inner: S,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S: Clone> Clone for CommandService<T, S> {
    fn clone(&self) -> Self {
        CommandService {
            names: Arc::clone(&self.names),
            feature: self.feature.clone(),
            reply_help: self.reply_help,
            reply_error: self.reply_error,
            block: self.block,
            check_bans: self.check_bans,
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, S> CommandService<T, S> {
    /// Replies and stops the chain if the sender or the feature is blocked.
    fn refused(&self, ctx: &HandlerContext) -> bool {
        if self.check_bans
            && let Ok(bans) = ctx.get_service::<BanList>()
            && bans.is_banned(&ctx.event().sender)
        {
            debug!(user = %ctx.event().sender, "Command from banned user refused");
            ctx.reply().write(BANNED_REPLY);
            return true;
        }
        if let Some(feature) = &self.feature
            && let Ok(flags) = ctx.get_service::<FeatureFlags>()
            && !flags.is_enabled(feature)
        {
            ctx.reply().write(format!("{feature} is disabled."));
            return true;
        }
        false
    }
}

impl<T, S> Service<Arc<HandlerContext>> for CommandService<T, S>
where
    T: Parser + Clone + Send + Sync + 'static,
    S: Service<Arc<HandlerContext>, Response = (), Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<HandlerContext>) -> Self::Future {
        let args = fragment_split(ctx.event().message.fragments());
        let matched = args
            .first()
            .is_some_and(|head| self.names.iter().any(|n| *n == head.to_lowercase()));
        if !matched {
            return futures::future::ready(Err(Box::new(EventSkipped) as BoxError)).boxed();
        }

        if self.block {
            ctx.stop_propagation();
        }
        if self.refused(&ctx) {
            ctx.stop_propagation();
            return futures::future::ready(Ok(())).boxed();
        }

        let reply_help = self.reply_help;
        let reply_error = self.reply_error;
        let mut inner = self.inner.clone();

        async move {
            match T::try_parse_from(&args) {
                Ok(cmd) => {
                    ctx.set_state(ParsedCommand(cmd));
                    inner.call(ctx).await
                }
                Err(err) => {
                    let is_help = matches!(
                        err.kind(),
                        ErrorKind::DisplayHelp
                            | ErrorKind::DisplayVersion
                            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                    );
                    if (is_help && reply_help) || (!is_help && reply_error) {
                        ctx.reply().write(err.to_string().trim_end().to_string());
                    }
                    Ok(())
                }
            }
        }
        .boxed()
    }
}
