//! Room/session coordinator for the Sonic Canvas server.

mod config;
mod contest;
mod coordinator;
mod events;
mod handler;
mod reaper;
mod runner;
mod signal;
mod state;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, PushError, UserProfile};
pub use events::{ClientEvent, ContestEndReason, RosterEntry, ScoreEntry, ServerEvent};
pub use reaper::spawn_reaper;
pub use runner::{router, run_server};
pub use state::AppState;
