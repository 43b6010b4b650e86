//! Transport-facing traits.
//!
//! The transport itself (sockets, HTTP, wire format) is an external
//! collaborator. The core only needs two capabilities from it:
//!
//! - [`EventSource`]: a lazy sequence of inbound [`MessageEvent`]s that keeps
//!   producing across reconnects;
//! - [`Transport`]: sending a single [`Fragment`] to a [`ReplyTarget`].
//!
//! [`Dispatcher`] is the seam between the runtime loop and the handler layer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::ReplyTarget;
use crate::error::{CoreError, CoreResult};
use crate::event::MessageEvent;
use crate::message::Fragment;

/// Outbound half of a chat connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Delivers one fragment to `target`.
    async fn send(&self, target: &ReplyTarget, fragment: &Fragment) -> CoreResult<()>;
}

/// Type-erased transport.
pub type BoxedTransport = Arc<dyn Transport>;

/// Inbound half of a chat connection.
///
/// `Ok(None)` means the source is exhausted and the runtime should stop.
/// `Err` reports a recoverable disconnect; the runtime logs it and polls
/// again after a backoff, so implementations reconnect inside `next_event`.
#[async_trait]
pub trait EventSource: Send + 'static {
    async fn next_event(&mut self) -> CoreResult<Option<MessageEvent>>;
}

/// Receives events and routes them to handlers.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Processes a single event to completion, including the final reply flush.
    async fn dispatch(&self, event: MessageEvent) -> CoreResult<()>;
}

// =============================================================================
// Channel-backed event source
// =============================================================================

/// An [`EventSource`] fed through an mpsc channel.
///
/// Useful for adapters that decode events on their own task, and in tests.
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<MessageEvent, String>>,
}

/// Sending half paired with a [`ChannelSource`].
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Result<MessageEvent, String>>,
}

impl ChannelSender {
    /// Pushes an event into the source.
    pub async fn push(&self, event: MessageEvent) -> CoreResult<()> {
        self.tx
            .send(Ok(event))
            .await
            .map_err(|_| CoreError::transport("event source closed"))
    }

    /// Signals a recoverable disconnect to the consumer.
    pub async fn disconnect(&self, reason: impl Into<String>) -> CoreResult<()> {
        self.tx
            .send(Err(reason.into()))
            .await
            .map_err(|_| CoreError::transport("event source closed"))
    }
}

/// Creates a channel-backed event source with the given buffer size.
pub fn channel_source(buffer: usize) -> (ChannelSender, ChannelSource) {
    let (tx, rx) = mpsc::channel(buffer);
    (ChannelSender { tx }, ChannelSource { rx })
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> CoreResult<Option<MessageEvent>> {
        match self.rx.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(reason)) => Err(CoreError::TransportFailure(reason)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_source_yields_then_ends() {
        let (tx, mut source) = channel_source(4);
        tx.push(MessageEvent::private(1, "u1", "a")).await.unwrap();
        tx.disconnect("reset by peer").await.unwrap();
        tx.push(MessageEvent::private(2, "u1", "b")).await.unwrap();
        drop(tx);

        assert_eq!(source.next_event().await.unwrap().unwrap().message_id, 1);
        assert_eq!(
            source.next_event().await.unwrap_err(),
            CoreError::transport("reset by peer")
        );
        assert_eq!(source.next_event().await.unwrap().unwrap().message_id, 2);
        assert_eq!(source.next_event().await.unwrap(), None);
    }
}
