//! Guess-the-concept game.
//!
//! Each conversation runs at most one game, held in a
//! [`SessionManager<PuzzleState>`]. Players ask yes/no questions that the
//! [`AskBackend`] judges, then try to guess the concept:
//!
//! ```text
//! /puzzle start              → category + instructions
//! /puzzle ask is it round?   → Yes. / No. / Unsure.
//! /puzzle guess kettle       → Correct! ... (game ends)
//! /puzzle reveal | quit      → game ends
//! ```
//!
//! Starting while a game runs is refused unless `replace_running` is set.
//!
//! Concepts come from the `[plugins.puzzle]` config section:
//!
//! ```toml
//! replace_running = false
//!
//! [[plugins.puzzle.concepts]]
//! answer = "Kettle"
//! aliases = ["tea kettle"]
//! category = "object"
//! description = "Boils water."
//! ```

mod model;
mod text;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::warn;

use roost_core::{AskBackend, CoreError, CoreResult, ErrorKind, ExecutionContext};
use roost_framework::{
    CommandArgs, EndReason, Plugin, PluginLoadContext, ServiceRef, ServiceRegistry,
    SessionManager, SessionPolicy, Transition, on_command, plugin,
};

pub use model::{Concept, PuzzleBook, PuzzleConfig, PuzzleState, Verdict};
pub use text::{levenshtein, normalize, similarity};

/// Feature switch and session namespace.
pub const PUZZLE_FEATURE: &str = "puzzle";

pub const NO_GAME_REPLY: &str = "No game in progress.";

pub const RUNNING_REPLY: &str =
    "A puzzle is already in progress. End it with /puzzle reveal or /puzzle quit first.";

/// Guesses closer than this get a hint.
const HINT_THRESHOLD: f64 = 0.5;

pub type PuzzleGames = SessionManager<PuzzleState>;

#[derive(Parser, Clone, Debug)]
#[command(name = "/puzzle", about = "Guess the concept by asking yes/no questions")]
pub struct PuzzleCommand {
    #[command(subcommand)]
    action: PuzzleAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum PuzzleAction {
    /// Start a new game
    Start,
    /// Ask a yes/no question about the concept
    Ask {
        #[arg(required = true, allow_hyphen_values = true)]
        question: Vec<String>,
    },
    /// Guess the concept
    Guess {
        #[arg(required = true, allow_hyphen_values = true)]
        answer: Vec<String>,
    },
    /// Give up and show the answer
    Reveal,
    /// End the game without revealing the answer
    Quit,
}

enum GuessOutcome {
    Correct(PuzzleState),
    Wrong { close: bool },
}

fn register_puzzle(ctx: &PluginLoadContext, registry: &mut ServiceRegistry) -> CoreResult<()> {
    let config: PuzzleConfig = ctx.get_config()?;
    if config.concepts.is_empty() {
        warn!(plugin = ctx.name(), "No puzzle concepts configured");
    }
    let idle_timeout = registry
        .get::<SessionPolicy>()
        .map(|policy| policy.idle_timeout)
        .unwrap_or_default();

    let games = Arc::new(PuzzleGames::new(PUZZLE_FEATURE).with_idle_timeout(idle_timeout));
    registry.register(Arc::new(PuzzleBook::new(config)))?;
    registry.register(Arc::clone(&games))?;
    registry.register_sweeper(games);
    Ok(())
}

/// Asks the judge while holding the room, so turns never interleave.
fn judge_turn<'a>(
    state: &'a mut PuzzleState,
    judge: Arc<dyn AskBackend>,
    book: Arc<PuzzleBook>,
    question: String,
) -> BoxFuture<'a, Transition<CoreResult<(Verdict, u32)>>> {
    async move {
        let prompt = book.judge_prompt(&state.concept, &question);
        let verdict = judge.ask(&prompt).await.map(|reply| Verdict::parse(&reply));
        if let Ok(v) = &verdict
            && v.counts()
        {
            state.questions += 1;
        }
        Transition::Continue(verdict.map(|v| (v, state.questions)))
    }
    .boxed()
}

fn session_error(err: CoreError) -> String {
    match err.kind() {
        ErrorKind::NoActiveSession => NO_GAME_REPLY.to_string(),
        _ => {
            warn!(error = %err, "Puzzle session failure");
            "Something went wrong, try again.".to_string()
        }
    }
}

fn with_description(mut text: String, concept: &Concept) -> String {
    if !concept.description.is_empty() {
        text.push('\n');
        text.push_str(&concept.description);
    }
    text
}

async fn puzzle(
    ctx: Arc<ExecutionContext>,
    cmd: CommandArgs<PuzzleCommand>,
    games: ServiceRef<PuzzleGames>,
    book: ServiceRef<PuzzleBook>,
    judge: ServiceRef<dyn AskBackend>,
) -> String {
    let room = ctx.conversation_id.as_str();
    match cmd.into_inner().action {
        PuzzleAction::Start => {
            let Some(concept) = book.random() else {
                return "No puzzles configured.".to_string();
            };
            let category = concept.category.clone();
            let started = format!(
                "New puzzle! Category: {category}.\n\
                 Ask with /puzzle ask <question>, answer with /puzzle guess <answer>."
            );
            if !book.replaces_running() {
                return match games.get_or_create(room, || PuzzleState::new(concept)).await {
                    Ok(info) if info.created => started,
                    Ok(_) => RUNNING_REPLY.to_string(),
                    Err(e) => session_error(e),
                };
            }
            match games.start(room, PuzzleState::new(concept)).await {
                Ok(Some(prev)) => format!(
                    "The previous game was abandoned (answer: {}).\n{started}",
                    prev.concept.answer
                ),
                Ok(None) => started,
                Err(e) => session_error(e),
            }
        }

        PuzzleAction::Ask { question } => {
            let question = question.join(" ");
            let judge = Arc::clone(&judge.0);
            let book = Arc::clone(&book.0);
            let turn = games
                .mutate_async(room, move |state| judge_turn(state, judge, book, question))
                .await;
            match turn {
                Ok(Ok((verdict, asked))) => format!("{verdict} (questions: {asked})"),
                Ok(Err(e)) => {
                    warn!(room, error = %e, "Judge backend failed");
                    "The judge is unavailable, try again later.".to_string()
                }
                Err(e) => session_error(e),
            }
        }

        PuzzleAction::Guess { answer } => {
            let guess = answer.join(" ");
            let outcome = games
                .mutate(room, |state| {
                    state.guesses += 1;
                    if state.concept.matches(&guess) {
                        Transition::End(EndReason::Success, GuessOutcome::Correct(state.clone()))
                    } else {
                        let close = state.concept.closeness(&guess) > HINT_THRESHOLD;
                        Transition::Continue(GuessOutcome::Wrong { close })
                    }
                })
                .await;
            match outcome {
                Ok(GuessOutcome::Correct(state)) => with_description(
                    format!(
                        "Correct! The answer is {}. Solved with {} questions and {} guesses.",
                        state.concept.answer, state.questions, state.guesses
                    ),
                    &state.concept,
                ),
                Ok(GuessOutcome::Wrong { close: true }) => "Wrong, but very close!".to_string(),
                Ok(GuessOutcome::Wrong { close: false }) => "Wrong guess.".to_string(),
                Err(e) => session_error(e),
            }
        }

        PuzzleAction::Reveal => {
            let ended = games
                .mutate(room, |state| Transition::End(EndReason::Reveal, state.clone()))
                .await;
            match ended {
                Ok(state) => with_description(
                    format!(
                        "The answer was {}. Questions: {}, guesses: {}.",
                        state.concept.answer, state.questions, state.guesses
                    ),
                    &state.concept,
                ),
                Err(e) => session_error(e),
            }
        }

        PuzzleAction::Quit => {
            match games
                .mutate(room, |_| Transition::End(EndReason::Abandon, ()))
                .await
            {
                Ok(()) => "Game abandoned.".to_string(),
                Err(e) => session_error(e),
            }
        }
    }
}

/// The `puzzle` plugin. Needs an [`AskBackend`] registered by the host.
pub fn puzzle_plugin() -> Plugin {
    plugin! {
        name: "puzzle",
        desc: "Guess-the-concept game judged by the ask backend",
        features: [PUZZLE_FEATURE],
        requires: [dyn AskBackend],
        init: register_puzzle,
        handlers: [
            on_command::<PuzzleCommand>("puzzle").feature(PUZZLE_FEATURE).handler(puzzle),
        ],
    }
}
