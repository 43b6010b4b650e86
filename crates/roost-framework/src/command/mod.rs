//! Slash commands parsed with clap.
//!
//! ```rust,ignore
//! #[derive(Parser, Clone)]
//! struct Roll {
//!     #[arg(default_value_t = 6)]
//!     sides: u32,
//! }
//!
//! let svc = on_command::<Roll>("roll")
//!     .alias("r")
//!     .feature("dice")
//!     .handler(|cmd: CommandArgs<Roll>| async move { format!("d{}", cmd.sides) });
//! ```
//!
//! Before parsing, the layer rejects banned senders and disabled features
//! with a short reply. A parse failure replies with clap's help or error
//! text. In every case where the command name matched, propagation stops.

pub mod extractor;
pub mod layer;
pub mod split;

pub use extractor::CommandArgs;
pub use layer::{CommandLayer, CommandService, on_command};
pub use split::{fragment_split, shell_split};
