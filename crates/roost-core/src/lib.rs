//! # Roost Core
//!
//! Leaf types of the Roost chat-command service.
//!
//! ## Contents
//!
//! - **Errors**: the [`CoreError`] taxonomy and the [`CoreResult`] alias that
//!   every operation returns
//! - **Events**: [`MessageEvent`], ids, and the [`Message`]/[`Fragment`] model
//! - **Execution context**: [`ExecutionContext`], bound per task through a
//!   tokio task-local ([`context::scope`], [`context::current`])
//! - **Collaborators**: [`Transport`], [`EventSource`], [`Dispatcher`],
//!   [`AskBackend`], [`KvStore`]
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐     ┌──────────────────────────────┐
//! │ EventSource │────▶│ Dispatcher │────▶│ handlers (task-local context) │──▶ Transport
//! └─────────────┘     └────────────┘     └──────────────────────────────┘
//! ```

pub mod backend;
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod transport;

pub use backend::{AskBackend, KvStore, MemoryStore};
pub use context::{ExecutionContext, ReplyTarget};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use event::{ChatKind, ConversationId, GroupId, MessageEvent, UserId};
pub use message::{Fragment, MediaRef, Message};
pub use transport::{
    BoxedTransport, ChannelSender, ChannelSource, Dispatcher, EventSource, Transport,
    channel_source,
};
