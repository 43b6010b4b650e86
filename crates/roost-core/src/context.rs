//! Per-event execution context.
//!
//! An [`ExecutionContext`] is created once per inbound event and carries the
//! identity and reply-routing data of that event. It is immutable and shared
//! through an `Arc`.
//!
//! The context is bound to the *task* processing the event with a tokio
//! task-local, so any code running inside [`scope`] can call [`current`]
//! without threading a parameter, and two events processed concurrently can
//! never observe each other's context:
//!
//! ```rust,ignore
//! let ctx = Arc::new(ExecutionContext::from_event(&event));
//! context::scope(ctx, async {
//!     let ctx = context::current()?;
//!     assert_eq!(ctx.sender_id.as_str(), "u1");
//!     Ok::<_, CoreError>(())
//! })
//! .await?;
//! ```
//!
//! Task-locals are not inherited by `tokio::spawn`; use [`spawn_scoped`] for
//! child tasks that must keep the context.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{CoreError, CoreResult};
use crate::event::{ChatKind, ConversationId, GroupId, MessageEvent, UserId};

tokio::task_local! {
    static CURRENT: Arc<ExecutionContext>;
}

/// Where replies for an event are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ReplyTarget {
    /// Reply into a group chat.
    Group(GroupId),
    /// Reply in a private chat with the user.
    Private(UserId),
}

impl std::fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group(g) => write!(f, "group:{g}"),
            Self::Private(u) => write!(f, "private:{u}"),
        }
    }
}

/// Identity and reply-routing data of one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub reply_target: ReplyTarget,
    pub is_group: bool,
}

impl ExecutionContext {
    /// Derives the context of `event`.
    pub fn from_event(event: &MessageEvent) -> Self {
        let reply_target = match &event.chat {
            ChatKind::Group { group_id } => ReplyTarget::Group(group_id.clone()),
            ChatKind::Private => ReplyTarget::Private(event.sender.clone()),
        };
        Self {
            conversation_id: event.conversation_id(),
            sender_id: event.sender.clone(),
            reply_target,
            is_group: event.is_group(),
        }
    }
}

/// Runs `fut` with `ctx` bound as the current context.
pub fn scope<F>(ctx: Arc<ExecutionContext>, fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT.scope(ctx, fut)
}

/// Returns the context bound to the current task.
///
/// Fails with [`CoreError::NoContext`] outside of [`scope`].
pub fn current() -> CoreResult<Arc<ExecutionContext>> {
    CURRENT.try_with(Arc::clone).map_err(|_| CoreError::NoContext)
}

/// Like [`current`], but returns `None` outside of a scope.
pub fn try_current() -> Option<Arc<ExecutionContext>> {
    CURRENT.try_with(Arc::clone).ok()
}

/// Spawns `fut` on a new task that keeps the current context bound.
pub fn spawn_scoped<F>(fut: F) -> CoreResult<JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let ctx = current()?;
    Ok(tokio::spawn(CURRENT.scope(ctx, fut)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn ctx_for(event: &MessageEvent) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::from_event(event))
    }

    #[test]
    fn derives_reply_target() {
        let g = ExecutionContext::from_event(&MessageEvent::group(1, "9", "u1", "x"));
        assert_eq!(g.reply_target, ReplyTarget::Group(GroupId::from("9")));
        assert!(g.is_group);

        let p = ExecutionContext::from_event(&MessageEvent::private(1, "u2", "x"));
        assert_eq!(p.reply_target, ReplyTarget::Private(UserId::from("u2")));
        assert_eq!(p.conversation_id.as_str(), "private:u2");
    }

    #[tokio::test]
    async fn current_outside_scope_fails() {
        assert_eq!(current(), Err(CoreError::NoContext));
        assert!(try_current().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scopes_are_isolated() {
        let mut handles = Vec::new();
        for i in 0..32u64 {
            let event = MessageEvent::group(i, format!("g{i}"), format!("u{i}"), "hi");
            let ctx = ctx_for(&event);
            handles.push(tokio::spawn(scope(ctx, async move {
                for step in 0..5u64 {
                    tokio::time::sleep(Duration::from_millis((i * 7 + step) % 5)).await;
                    let seen = current().unwrap();
                    assert_eq!(seen.sender_id.as_str(), format!("u{i}"));
                }
                i
            })));
        }
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.await.unwrap(), i as u64);
        }
    }

    #[tokio::test]
    async fn plain_spawn_does_not_inherit() {
        let ctx = ctx_for(&MessageEvent::private(1, "u1", "x"));
        scope(ctx, async {
            let leaked = tokio::spawn(async { try_current() }).await.unwrap();
            assert!(leaked.is_none());

            let kept = spawn_scoped(async { current().map(|c| c.sender_id.clone()) })
                .unwrap()
                .await
                .unwrap();
            assert_eq!(kept, Ok(UserId::from("u1")));
        })
        .await;
    }
}
