//! Plugins bundled with Roost.
//!
//! | Plugin | Commands | Needs |
//! |--------|----------|-------|
//! | [`admin_plugin`] | `/token`, `/status` | `TokenService`, `FeatureFlags`, `BanList`, `AdminList` |
//! | [`puzzle_plugin`] | `/puzzle start\|ask\|guess\|reveal\|quit` | `dyn AskBackend` |
//! | [`roulette_plugin`] | `/highnoon`, `/fire` | |
//!
//! The runtime registers every service in the first column except the
//! backend, which the host supplies.

pub mod admin;
pub mod puzzle;
pub mod roulette;

pub use admin::{StatusAction, StatusCommand, TokenCommand, admin_plugin};
pub use puzzle::{Concept, PuzzleBook, PuzzleConfig, PuzzleGames, PuzzleState, puzzle_plugin};
pub use roulette::{RouletteConfig, RouletteGames, RouletteState, Shot, roulette_plugin};

/// Every bundled plugin, in dispatch order.
pub fn builtin_plugins() -> Vec<roost_framework::Plugin> {
    vec![admin_plugin(), puzzle_plugin(), roulette_plugin()]
}
