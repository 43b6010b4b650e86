//! High-noon revolver roulette.
//!
//! One bullet sits in a random chamber. Players in a group take turns pulling
//! the trigger until someone hits it, which ends the duel:
//!
//! ```text
//! /highnoon   → the cylinder is loaded
//! /fire       → Click. ... (2 / 6)
//! /fire       → Bang! ... (duel over)
//! ```
//!
//! The hit is detected and the session removed in the same room turn, so a
//! `/fire` racing the fatal shot finds no duel instead of a dead one.
//!
//! ```toml
//! [plugins.roulette]
//! chambers = 6
//! ```

use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tracing::warn;

use roost_core::{CoreError, CoreResult, ErrorKind, ExecutionContext};
use roost_framework::{
    CommandArgs, EndReason, Plugin, PluginConfig, PluginLoadContext, ServiceRef, ServiceRegistry,
    SessionManager, SessionPolicy, Transition, on_command, plugin,
};

/// Feature switch and session namespace.
pub const ROULETTE_FEATURE: &str = "roulette";

pub const NO_DUEL_REPLY: &str = "No game in progress.";

pub const GROUP_ONLY_REPLY: &str = "Duels happen in groups.";

const MISS_LINES: &[&str] = &[
    "Click. There is no way back.",
    "Click. Steady hands, heroes.",
    "Click. Tremble before true courage.",
    "Click. Your faith is wearing thin.",
    "Click. No room left for regret.",
];

pub type RouletteGames = SessionManager<RouletteState>;

/// `[plugins.roulette]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouletteConfig {
    /// Cylinder size, at least 2.
    pub chambers: u8,
}

impl Default for RouletteConfig {
    fn default() -> Self {
        Self { chambers: 6 }
    }
}

/// Per-room cylinder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouletteState {
    chambers: u8,
    /// One-based chamber holding the bullet.
    bullet: u8,
    shots: u8,
    players: Vec<String>,
}

/// Result of one trigger pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shot {
    Miss { shot: u8, chambers: u8 },
    Hit { shots: u8, players: usize },
}

impl RouletteState {
    /// Loads the bullet into a random chamber.
    pub fn load(chambers: u8) -> Self {
        Self::with_bullet(chambers, rand::random_range(1..=chambers))
    }

    pub fn with_bullet(chambers: u8, bullet: u8) -> Self {
        Self {
            chambers,
            bullet,
            shots: 0,
            players: Vec::new(),
        }
    }

    pub fn shots(&self) -> u8 {
        self.shots
    }

    /// Pulls the trigger for `player`; the hit ends the session.
    pub fn pull(&mut self, player: &str) -> Transition<Shot> {
        if !self.players.iter().any(|p| p == player) {
            self.players.push(player.to_string());
        }
        self.shots += 1;
        if self.shots >= self.bullet {
            Transition::End(
                EndReason::Success,
                Shot::Hit {
                    shots: self.shots,
                    players: self.players.len(),
                },
            )
        } else {
            Transition::Continue(Shot::Miss {
                shot: self.shots,
                chambers: self.chambers,
            })
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(name = "/highnoon", about = "Load the revolver and start a duel")]
pub struct HighNoonCommand {}

#[derive(Parser, Clone, Debug)]
#[command(name = "/fire", about = "Pull the trigger in the running duel")]
pub struct FireCommand {}

fn register_roulette(ctx: &PluginLoadContext, registry: &mut ServiceRegistry) -> CoreResult<()> {
    let config: RouletteConfig = ctx.get_config()?;
    if config.chambers < 2 {
        return Err(CoreError::configuration(format!(
            "plugins.{}.chambers must be at least 2",
            ctx.name()
        )));
    }
    let idle_timeout = registry
        .get::<SessionPolicy>()
        .map(|policy| policy.idle_timeout)
        .unwrap_or_default();

    let games = Arc::new(RouletteGames::new(ROULETTE_FEATURE).with_idle_timeout(idle_timeout));
    registry.register(Arc::clone(&games))?;
    registry.register_sweeper(games);
    Ok(())
}

fn session_error(err: CoreError) -> String {
    if err.kind() == ErrorKind::NoActiveSession {
        return NO_DUEL_REPLY.to_string();
    }
    warn!(error = %err, "Roulette session failure");
    "Something went wrong, try again.".to_string()
}

async fn high_noon(
    ctx: Arc<ExecutionContext>,
    _cmd: CommandArgs<HighNoonCommand>,
    config: PluginConfig<RouletteConfig>,
    games: ServiceRef<RouletteGames>,
) -> String {
    if !ctx.is_group {
        return GROUP_ONLY_REPLY.to_string();
    }
    let chambers = config.chambers;
    match games
        .get_or_create(ctx.conversation_id.as_str(), || RouletteState::load(chambers))
        .await
    {
        Ok(info) if info.created => format!(
            "It's high noon. One bullet, {chambers} chambers.\nTake turns with /fire."
        ),
        Ok(_) => "A duel is already in progress.".to_string(),
        Err(e) => session_error(e),
    }
}

async fn fire(
    ctx: Arc<ExecutionContext>,
    _cmd: CommandArgs<FireCommand>,
    games: ServiceRef<RouletteGames>,
) -> String {
    if !ctx.is_group {
        return GROUP_ONLY_REPLY.to_string();
    }
    let shooter = ctx.sender_id.as_str();
    match games
        .mutate(ctx.conversation_id.as_str(), |state| state.pull(shooter))
        .await
    {
        Ok(Shot::Miss { shot, chambers }) => {
            let line = MISS_LINES[usize::from(shot - 1) % MISS_LINES.len()];
            format!("{line} ({shot} / {chambers})")
        }
        Ok(Shot::Hit { shots, players }) => format!(
            "Bang! {shooter} takes the bullet on pull {shots} ({players} players).\n\
             The pendulum comes to rest."
        ),
        Err(e) => session_error(e),
    }
}

/// The `roulette` plugin: `/highnoon` and `/fire`.
pub fn roulette_plugin() -> Plugin {
    plugin! {
        name: "roulette",
        desc: "Revolver roulette, one bullet per duel",
        features: [ROULETTE_FEATURE],
        init: register_roulette,
        handlers: [
            on_command::<HighNoonCommand>("highnoon")
                .alias("duel")
                .feature(ROULETTE_FEATURE)
                .handler(high_noon),
            on_command::<FireCommand>("fire")
                .feature(ROULETTE_FEATURE)
                .handler(fire),
        ],
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use roost_core::{MessageEvent, ReplyTarget};
    use roost_framework::testing::TestHarness;
    use serde_json::json;

    use super::*;

    fn harness(config: serde_json::Value) -> CoreResult<TestHarness> {
        let configs = HashMap::from([("roulette".to_string(), config)]);
        TestHarness::with_configs(vec![roulette_plugin()], ServiceRegistry::new(), configs)
    }

    fn shoot(id: u64, user: &str, text: &str) -> MessageEvent {
        MessageEvent::group(id, "g1", user, text)
    }

    fn replies(h: &TestHarness) -> Vec<String> {
        h.transport.texts_for(&ReplyTarget::Group("g1".into()))
    }

    #[tokio::test]
    async fn hit_ends_the_duel_in_the_same_turn() {
        let games = RouletteGames::new(ROULETTE_FEATURE);
        games
            .get_or_create("g1", || RouletteState::with_bullet(6, 2))
            .await
            .unwrap();

        let first = games.mutate("g1", |s| s.pull("alice")).await.unwrap();
        assert_eq!(first, Shot::Miss { shot: 1, chambers: 6 });
        let second = games.mutate("g1", |s| s.pull("bob")).await.unwrap();
        assert_eq!(second, Shot::Hit { shots: 2, players: 2 });

        assert!(!games.is_active("g1").await);
        let err = games.mutate("g1", |s| s.pull("carol")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveSession);
    }

    #[tokio::test]
    async fn fire_after_the_hit_finds_no_game() {
        let h = harness(json!({ "chambers": 3 })).unwrap();
        h.send(shoot(1, "alice", "/highnoon")).await.unwrap();
        h.send(shoot(2, "bob", "/duel")).await.unwrap();

        let mut id = 3;
        while !replies(&h).last().is_some_and(|r| r.starts_with("Bang!")) {
            assert!(id < 10, "the bullet must be hit within the cylinder");
            h.send(shoot(id, "alice", "/fire")).await.unwrap();
            id += 1;
        }
        h.send(shoot(id, "bob", "/fire")).await.unwrap();

        let r = replies(&h);
        assert_eq!(
            r[0],
            "It's high noon. One bullet, 3 chambers.\nTake turns with /fire."
        );
        assert_eq!(r[1], "A duel is already in progress.");
        assert_eq!(r.last().map(String::as_str), Some(NO_DUEL_REPLY));
        if !r[2].starts_with("Bang!") {
            assert_eq!(r[2], "Click. There is no way back. (1 / 3)");
        }
    }

    #[tokio::test]
    async fn commands_are_group_only() {
        let h = harness(serde_json::Value::Null).unwrap();
        h.send(MessageEvent::private(1, "alice", "/highnoon")).await.unwrap();
        h.send(MessageEvent::private(2, "alice", "/fire")).await.unwrap();
        assert_eq!(
            h.transport.texts_for(&ReplyTarget::Private("alice".into())),
            vec![GROUP_ONLY_REPLY, GROUP_ONLY_REPLY]
        );
    }

    #[test]
    fn a_single_chamber_is_rejected() {
        let err = harness(json!({ "chambers": 1 })).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn loaded_bullet_is_inside_the_cylinder() {
        for _ in 0..64 {
            let state = RouletteState::load(6);
            assert!((1..=6).contains(&state.bullet));
            assert_eq!(state.shots(), 0);
        }
    }
}
