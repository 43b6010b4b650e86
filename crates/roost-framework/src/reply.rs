//! Reply buffering with per-conversation ordered flush.
//!
//! Every event gets one [`ReplyBuffer`] bound to its [`ExecutionContext`].
//! Handlers append fragments; a flush sends them through the shared
//! [`Outbox`] **inline**, in the calling task, while holding the gate of the
//! target conversation:
//!
//! ```text
//! event A (group:1) ──write──▶ buffer A ─┐
//!                                        ├─ gate "group:1" (FIFO) ──▶ Transport
//! event B (group:1) ──write──▶ buffer B ─┘
//! event C (group:2) ──write──▶ buffer C ─── gate "group:2" ─────────▶ Transport
//! ```
//!
//! Gates are `tokio::sync::Mutex`es, which are fair: two flushes for the same
//! conversation complete in the order they were requested, while different
//! conversations never wait on each other.
//!
//! The buffer of the current task is also reachable without a parameter
//! through [`write`], [`flush`] and [`finish`], once [`scope`] has bound it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use roost_core::context::{self, ExecutionContext};
use roost_core::{BoxedTransport, ConversationId, CoreError, CoreResult, Fragment, Message};

use crate::sweep::Sweep;

tokio::task_local! {
    static BUFFER: Arc<ReplyBuffer>;
}

/// Guarded value is the instant of the last successful send.
type Gate = Arc<AsyncMutex<Option<Instant>>>;

// =============================================================================
// Outbox
// =============================================================================

/// Shared sending side: the transport plus one gate per conversation.
pub struct Outbox {
    transport: BoxedTransport,
    min_interval: Option<Duration>,
    gates: Mutex<HashMap<ConversationId, Gate>>,
}

impl Outbox {
    pub fn new(transport: BoxedTransport) -> Self {
        Self {
            transport,
            min_interval: None,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Enforces a pause of at least `interval` between two sends to the same
    /// conversation. A zero interval disables throttling.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    /// Number of conversation gates currently held.
    pub fn gate_count(&self) -> usize {
        self.gates.lock().len()
    }

    fn gate(&self, conversation: &ConversationId) -> Gate {
        Arc::clone(self.gates.lock().entry(conversation.clone()).or_default())
    }

    /// Removes gates that nobody is waiting on and whose throttle window has
    /// passed.
    pub fn prune_idle_gates(&self) -> usize {
        let now = Instant::now();
        let min_interval = self.min_interval.unwrap_or_default();
        let mut gates = self.gates.lock();
        let before = gates.len();
        gates.retain(|_, gate| {
            if Arc::strong_count(gate) > 1 {
                return true;
            }
            match gate.try_lock() {
                Ok(last) => match *last {
                    Some(at) => now.duration_since(at) < min_interval,
                    None => false,
                },
                Err(_) => true,
            }
        });
        before - gates.len()
    }
}

#[async_trait]
impl Sweep for Outbox {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn sweep(&self) -> usize {
        self.prune_idle_gates()
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("min_interval", &self.min_interval)
            .field("gates", &self.gate_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ReplyBuffer
// =============================================================================

/// Ordered fragments waiting to be sent for one event.
pub struct ReplyBuffer {
    ctx: Arc<ExecutionContext>,
    outbox: Arc<Outbox>,
    pending: Mutex<Vec<Fragment>>,
    finished: AtomicBool,
}

impl ReplyBuffer {
    pub fn new(ctx: Arc<ExecutionContext>, outbox: Arc<Outbox>) -> Self {
        Self {
            ctx,
            outbox,
            pending: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
        }
    }

    /// The context this buffer replies to.
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    /// Appends a fragment.
    pub fn write(&self, fragment: impl Into<Fragment>) {
        self.pending.lock().push(fragment.into());
    }

    /// Appends every fragment of `message`.
    pub fn write_message(&self, message: Message) {
        self.pending.lock().extend(message);
    }

    /// Appends `text`, preceded by a mention of the sender in group chats.
    pub fn write_at(&self, text: impl Into<String>) {
        let mut pending = self.pending.lock();
        if self.ctx.is_group {
            pending.push(Fragment::Mention(self.ctx.sender_id.clone()));
        }
        pending.push(Fragment::Text(text.into()));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Drops pending fragments without sending them.
    pub fn discard(&self) -> usize {
        std::mem::take(&mut *self.pending.lock()).len()
    }

    /// Sends all pending fragments in order and returns how many were sent.
    ///
    /// On a transport error the fragments already delivered stay delivered;
    /// the failed fragment and everything after it return to the front of
    /// the buffer and the error is returned.
    pub async fn flush(&self) -> CoreResult<usize> {
        let gate = self.outbox.gate(&self.ctx.conversation_id);
        let mut last_send = gate.lock().await;

        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        for (sent, fragment) in batch.iter().enumerate() {
            if let (Some(interval), Some(prev)) = (self.outbox.min_interval, *last_send) {
                tokio::time::sleep_until(prev + interval).await;
            }
            if let Err(e) = self
                .outbox
                .transport
                .send(&self.ctx.reply_target, fragment)
                .await
            {
                let mut restored = batch[sent..].to_vec();
                let mut pending = self.pending.lock();
                restored.append(&mut pending);
                *pending = restored;
                drop(pending);
                error!(
                    conversation = %self.ctx.conversation_id,
                    sent,
                    remaining = batch.len() - sent,
                    error = %e,
                    "Reply flush failed"
                );
                return Err(e);
            }
            *last_send = Some(Instant::now());
        }

        debug!(
            conversation = %self.ctx.conversation_id,
            sent = batch.len(),
            "Replies flushed"
        );
        Ok(batch.len())
    }

    /// Appends `fragment`, flushes, and marks the handler chain as done.
    pub async fn finish(&self, fragment: impl Into<Fragment>) -> CoreResult<()> {
        self.write(fragment);
        self.close().await.map(|_| ())
    }

    /// Marks the handler chain as done and flushes what is pending.
    pub async fn close(&self) -> CoreResult<usize> {
        self.finished.store(true, Ordering::SeqCst);
        self.flush().await
    }
}

impl std::fmt::Debug for ReplyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyBuffer")
            .field("conversation", &self.ctx.conversation_id)
            .field("pending", &self.pending_len())
            .field("finished", &self.is_finished())
            .finish()
    }
}

// =============================================================================
// Task-local access
// =============================================================================

/// Runs `fut` with `buffer` and its context bound to the current task.
pub fn scope<F>(buffer: Arc<ReplyBuffer>, fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let ctx = Arc::clone(buffer.context());
    context::scope(ctx, BUFFER.scope(buffer, fut))
}

/// Returns the buffer bound to the current task.
pub fn current_buffer() -> CoreResult<Arc<ReplyBuffer>> {
    BUFFER.try_with(Arc::clone).map_err(|_| CoreError::NoContext)
}

/// Appends to the current task's buffer.
pub fn write(fragment: impl Into<Fragment>) -> CoreResult<()> {
    current_buffer()?.write(fragment);
    Ok(())
}

/// Flushes the current task's buffer.
pub async fn flush() -> CoreResult<usize> {
    current_buffer()?.flush().await
}

/// Appends, flushes and finishes the current task's buffer.
pub async fn finish(fragment: impl Into<Fragment>) -> CoreResult<()> {
    current_buffer()?.finish(fragment).await
}

/// Spawns `fut` on a new task that keeps both the context and the buffer.
pub fn spawn_scoped<F>(fut: F) -> CoreResult<JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let buffer = current_buffer()?;
    Ok(tokio::spawn(scope(buffer, fut)))
}

#[cfg(test)]
mod tests {
    use roost_core::{MessageEvent, ReplyTarget};

    use super::*;
    use crate::testing::RecordingTransport;

    fn buffer_for(event: &MessageEvent, outbox: &Arc<Outbox>) -> Arc<ReplyBuffer> {
        let ctx = Arc::new(ExecutionContext::from_event(event));
        Arc::new(ReplyBuffer::new(ctx, Arc::clone(outbox)))
    }

    #[tokio::test]
    async fn flush_sends_in_order_and_clears() {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = Arc::new(Outbox::new(transport.clone()));
        let buf = buffer_for(&MessageEvent::group(1, "7", "u1", "hi"), &outbox);

        buf.write_at("one");
        buf.write("two");
        assert_eq!(buf.pending_len(), 3);
        assert_eq!(buf.flush().await.unwrap(), 3);
        assert_eq!(buf.pending_len(), 0);
        assert_eq!(buf.flush().await.unwrap(), 0);

        let target = ReplyTarget::Group("7".into());
        assert_eq!(
            transport.sent(),
            vec![
                (target.clone(), Fragment::mention("u1")),
                (target.clone(), Fragment::text("one")),
                (target, Fragment::text("two")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn same_conversation_flushes_in_submission_order() {
        let transport = Arc::new(RecordingTransport::new().with_delay(Duration::from_millis(10)));
        let outbox = Arc::new(Outbox::new(transport.clone()));

        let mut handles = Vec::new();
        for i in 0..8u64 {
            let buf = buffer_for(&MessageEvent::group(i, "7", format!("u{i}"), "x"), &outbox);
            buf.write(format!("{i}-a"));
            buf.write(format!("{i}-b"));
            handles.push(tokio::spawn(async move { buf.flush().await }));
            // let task i reach the gate before task i+1 is spawned
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(2));
        }

        let texts: Vec<String> = transport.sent().into_iter().map(|(_, f)| f.display()).collect();
        let expected: Vec<String> = (0..8)
            .flat_map(|i| [format!("{i}-a"), format!("{i}-b")])
            .collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn different_conversations_flush_in_parallel() {
        let transport = Arc::new(RecordingTransport::new().with_delay(Duration::from_millis(10)));
        let outbox = Arc::new(Outbox::new(transport.clone()));
        let a = buffer_for(&MessageEvent::group(1, "1", "u1", "x"), &outbox);
        let b = buffer_for(&MessageEvent::group(2, "2", "u2", "x"), &outbox);
        a.write("a");
        b.write("b");

        let start = Instant::now();
        let (ra, rb) = tokio::join!(a.flush(), b.flush());
        assert_eq!((ra, rb), (Ok(1), Ok(1)));
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn failed_send_keeps_unsent_tail() {
        let transport = Arc::new(RecordingTransport::new().fail_on(1));
        let outbox = Arc::new(Outbox::new(transport.clone()));
        let buf = buffer_for(&MessageEvent::private(1, "u1", "x"), &outbox);
        buf.write("first");
        buf.write("second");
        buf.write("third");

        let err = buf.flush().await.unwrap_err();
        assert_eq!(err.kind(), roost_core::ErrorKind::TransportFailure);
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(buf.pending_len(), 2);

        assert_eq!(buf.flush().await.unwrap(), 2);
        let texts: Vec<String> = transport.sent().into_iter().map(|(_, f)| f.display()).collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn min_interval_spaces_sends() {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = Arc::new(
            Outbox::new(transport.clone()).with_min_interval(Duration::from_millis(800)),
        );
        let buf = buffer_for(&MessageEvent::group(1, "1", "u1", "x"), &outbox);
        buf.write("a");
        buf.write("b");

        let start = Instant::now();
        buf.flush().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(800));

        drop(buf);
        assert_eq!(outbox.prune_idle_gates(), 0);
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(outbox.prune_idle_gates(), 1);
        assert_eq!(outbox.gate_count(), 0);
    }

    #[tokio::test]
    async fn finish_marks_done_and_discard_drops() {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = Arc::new(Outbox::new(transport.clone()));
        let buf = buffer_for(&MessageEvent::private(1, "u1", "x"), &outbox);

        buf.write("dropped");
        assert_eq!(buf.discard(), 1);
        buf.finish("bye").await.unwrap();
        assert!(buf.is_finished());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn task_local_access() {
        assert_eq!(write("x"), Err(CoreError::NoContext));
        assert_eq!(flush().await, Err(CoreError::NoContext));

        let transport = Arc::new(RecordingTransport::new());
        let outbox = Arc::new(Outbox::new(transport.clone()));
        let buf = buffer_for(&MessageEvent::private(1, "u1", "x"), &outbox);

        scope(buf, async {
            write("from handler").unwrap();
            spawn_scoped(async {
                assert_eq!(context::current().unwrap().sender_id.as_str(), "u1");
                write("from child").unwrap();
            })
            .unwrap()
            .await
            .unwrap();
            assert_eq!(flush().await, Ok(2));
        })
        .await;
        assert_eq!(transport.sent().len(), 2);
    }
}
