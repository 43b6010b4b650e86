//! Token-gated status control.
//!
//! An admin asks for a one-time token in a private chat, then spends it on a
//! single control action in a group:
//!
//! ```text
//! private:  /token
//!           ← Your token: q3J9…  Valid for 5 minutes.
//! group:    /status q3J9… toggle puzzle
//!           ← puzzle is now disabled.
//! ```
//!
//! Every token failure (unknown, expired, spent, or owned by someone else)
//! gets the same reply.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use roost_core::{ExecutionContext, UserId};
use roost_framework::{
    AdminList, BanList, CommandArgs, FeatureFlags, Plugin, ServiceRef, TokenService, on_command,
    plugin,
};

pub const INVALID_TOKEN_REPLY: &str = "Invalid token.";

#[derive(Parser, Clone, Debug)]
#[command(name = "/token", about = "Request a one-time admin token (private chat only)")]
pub struct TokenCommand {}

#[derive(Parser, Clone, Debug)]
#[command(name = "/status", about = "Spend an admin token on a control action")]
pub struct StatusCommand {
    /// Token obtained with /token
    #[arg(allow_hyphen_values = true)]
    token: String,

    #[command(subcommand)]
    action: Option<StatusAction>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum StatusAction {
    /// Flip a feature declared by a plugin or the config
    Toggle { feature: String },
    /// Refuse all commands from a user
    Ban { user: String },
    /// Lift a ban
    Unban { user: String },
    /// Show feature switches, bans and outstanding tokens
    Status,
}

async fn request_token(
    ctx: Arc<ExecutionContext>,
    admins: ServiceRef<AdminList>,
    tokens: ServiceRef<TokenService>,
) -> String {
    if ctx.is_group {
        return "Request a token in a private chat.".to_string();
    }
    if !admins.is_admin(&ctx.sender_id) {
        return "Permission denied.".to_string();
    }

    let token = tokens.issue_default(ctx.sender_id.as_str());
    let minutes = (token.expires_at - token.issued_at).as_secs().div_ceil(60);
    format!(
        "Your token: {}\nValid for {minutes} minutes.\nIn a group, send: /status {} <toggle|ban|unban|status>",
        token.value, token.value
    )
}

async fn status_control(
    ctx: Arc<ExecutionContext>,
    cmd: CommandArgs<StatusCommand>,
    tokens: ServiceRef<TokenService>,
    flags: ServiceRef<FeatureFlags>,
    bans: ServiceRef<BanList>,
) -> String {
    if !ctx.is_group {
        return "Use this command in a group.".to_string();
    }
    if tokens.validate_for(&cmd.token, ctx.sender_id.as_str()).is_err() {
        return INVALID_TOKEN_REPLY.to_string();
    }

    match cmd.action.clone().unwrap_or(StatusAction::Status) {
        StatusAction::Toggle { feature } => match flags.toggle(&feature) {
            Some(true) => format!("{feature} is now enabled."),
            Some(false) => format!("{feature} is now disabled."),
            None => unknown_feature(&feature, &flags.available()),
        },
        StatusAction::Ban { user } => match bans.ban(&UserId::new(&user)).await {
            Ok(true) => format!("User {user} is banned."),
            Ok(false) => format!("User {user} is already banned."),
            Err(e) => format!("Ban failed: {e}"),
        },
        StatusAction::Unban { user } => match bans.unban(&UserId::new(&user)).await {
            Ok(true) => format!("User {user} is unbanned."),
            Ok(false) => format!("User {user} is not banned."),
            Err(e) => format!("Unban failed: {e}"),
        },
        StatusAction::Status => status_report(&flags, &bans, &tokens),
    }
}

fn unknown_feature(feature: &str, available: &[String]) -> String {
    let available = if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    };
    format!("Unknown feature '{feature}'. Available: {available}.")
}

fn status_report(flags: &FeatureFlags, bans: &BanList, tokens: &TokenService) -> String {
    let mut lines = vec!["Features:".to_string()];
    let snapshot = flags.snapshot();
    if snapshot.is_empty() {
        lines.push("  (all enabled)".to_string());
    }
    for (feature, enabled) in snapshot {
        lines.push(format!("  {feature}: {}", if enabled { "on" } else { "off" }));
    }
    lines.push(format!("Banned users: {}", bans.len()));
    lines.push(format!("Outstanding tokens: {}", tokens.outstanding()));
    lines.join("\n")
}

/// The `admin` plugin: `/token` and `/status`.
pub fn admin_plugin() -> Plugin {
    plugin! {
        name: "admin",
        desc: "Token-gated feature switches and ban management",
        requires: [TokenService, FeatureFlags, BanList, AdminList],
        handlers: [
            on_command::<TokenCommand>("token").handler(request_token),
            on_command::<StatusCommand>("status").handler(status_control),
        ],
    }
}

#[cfg(test)]
mod tests {
    use roost_core::{MemoryStore, MessageEvent, ReplyTarget};
    use roost_framework::ServiceRegistry;
    use roost_framework::testing::TestHarness;

    use super::*;

    struct Fixture {
        harness: TestHarness,
        flags: Arc<FeatureFlags>,
        bans: Arc<BanList>,
    }

    fn fixture() -> Fixture {
        let flags = Arc::new(FeatureFlags::from_map([("puzzle", true)]));
        let bans = Arc::new(BanList::new(Arc::new(MemoryStore::new())));
        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(TokenService::default())).unwrap();
        registry.register(Arc::clone(&flags)).unwrap();
        registry.register(Arc::clone(&bans)).unwrap();
        registry.register(Arc::new(AdminList::new(["root"]))).unwrap();
        let harness = TestHarness::new(vec![admin_plugin()], registry).unwrap();
        Fixture {
            harness,
            flags,
            bans,
        }
    }

    fn group_replies(h: &TestHarness) -> Vec<String> {
        h.transport.texts_for(&ReplyTarget::Group("g1".into()))
    }

    async fn obtain_token(h: &TestHarness, user: &str) -> String {
        h.send(MessageEvent::private(1, user, "/token")).await.unwrap();
        let replies = h.transport.texts_for(&ReplyTarget::Private(user.into()));
        let reply = replies.last().unwrap();
        reply
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("Your token: "))
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn token_request_rules() {
        let f = fixture();
        let h = &f.harness;

        h.send(MessageEvent::group(1, "g1", "root", "/token")).await.unwrap();
        assert_eq!(group_replies(h), vec!["Request a token in a private chat."]);

        h.send(MessageEvent::private(2, "mallory", "/token")).await.unwrap();
        assert_eq!(
            h.transport.texts_for(&ReplyTarget::Private("mallory".into())),
            vec!["Permission denied."]
        );

        let token = obtain_token(h, "root").await;
        assert_eq!(token.len(), 22);
        let reply = h.transport.texts_for(&ReplyTarget::Private("root".into()));
        assert!(reply[0].contains("Valid for 5 minutes."));
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let f = fixture();
        let h = &f.harness;
        let token = obtain_token(h, "root").await;

        let cmd = format!("/status {token} toggle puzzle");
        h.send(MessageEvent::group(2, "g1", "root", &cmd)).await.unwrap();
        h.send(MessageEvent::group(3, "g1", "root", &cmd)).await.unwrap();
        assert_eq!(
            group_replies(h),
            vec!["puzzle is now disabled.", INVALID_TOKEN_REPLY]
        );
        assert!(!f.flags.is_enabled("puzzle"));
    }

    #[tokio::test]
    async fn toggling_an_unknown_feature_changes_nothing() {
        let f = fixture();
        let h = &f.harness;
        let token = obtain_token(h, "root").await;

        let cmd = format!("/status {token} toggle puzzel");
        h.send(MessageEvent::group(2, "g1", "root", &cmd)).await.unwrap();
        assert_eq!(
            group_replies(h),
            vec!["Unknown feature 'puzzel'. Available: puzzle."]
        );
        assert!(f.flags.is_enabled("puzzle"));
        assert_eq!(f.flags.snapshot(), vec![("puzzle".to_string(), true)]);
    }

    #[tokio::test]
    async fn token_of_another_user_is_rejected_and_kept() {
        let f = fixture();
        let h = &f.harness;
        let token = obtain_token(h, "root").await;

        let cmd = format!("/status {token} ban bob");
        h.send(MessageEvent::group(2, "g1", "mallory", &cmd)).await.unwrap();
        h.send(MessageEvent::group(3, "g1", "root", &cmd)).await.unwrap();
        assert_eq!(
            group_replies(h),
            vec![INVALID_TOKEN_REPLY, "User bob is banned."]
        );
        assert!(f.bans.is_banned(&UserId::new("bob")));
    }

    #[tokio::test]
    async fn banned_users_are_refused() {
        let f = fixture();
        let h = &f.harness;
        let token = obtain_token(h, "root").await;
        h.send(MessageEvent::group(2, "g1", "root", &format!("/status {token} ban eve")))
            .await
            .unwrap();

        h.transport.clear();
        h.send(MessageEvent::group(3, "g1", "eve", "/status whatever"))
            .await
            .unwrap();
        assert_eq!(group_replies(h), vec!["Your account is banned."]);
    }

    #[tokio::test]
    async fn status_report_and_private_refusal() {
        let f = fixture();
        let h = &f.harness;
        let token = obtain_token(h, "root").await;

        h.send(MessageEvent::private(2, "root", &format!("/status {token}")))
            .await
            .unwrap();
        let private = h.transport.texts_for(&ReplyTarget::Private("root".into()));
        assert_eq!(private.last().unwrap(), "Use this command in a group.");

        h.send(MessageEvent::group(3, "g1", "root", &format!("/status {token} status")))
            .await
            .unwrap();
        assert_eq!(
            group_replies(h),
            vec!["Features:\n  puzzle: on\nBanned users: 0\nOutstanding tokens: 1"]
        );
    }

    #[test]
    fn startup_requires_core_services() {
        let err = TestHarness::new(vec![admin_plugin()], ServiceRegistry::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), roost_core::ErrorKind::NotRegistered);
    }
}
