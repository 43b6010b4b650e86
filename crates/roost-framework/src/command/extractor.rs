use clap::Parser;

use crate::context::HandlerContext;
use crate::error::{ExtractError, ExtractResult};
use crate::extractor::FromContext;

/// The command parsed by [`on_command`](super::on_command).
///
/// ```rust,ignore
/// async fn status(cmd: CommandArgs<StatusCommand>) -> String {
///     format!("action: {:?}", cmd.action)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CommandArgs<T: Parser>(pub T);

impl<T: Parser> CommandArgs<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Parser> std::ops::Deref for CommandArgs<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: Parser + Clone + Send + Sync + 'static> FromContext for CommandArgs<T> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        ctx.get_state::<ParsedCommand<T>>()
            .map(|parsed| CommandArgs(parsed.0))
            .ok_or(ExtractError::MissingState(std::any::type_name::<T>()))
    }
}

/// Storage wrapper for the parsed command in the plugin state map.
#[derive(Clone)]
pub(crate) struct ParsedCommand<T>(pub T);
