//! Shared types for the Charla chat backend.

mod conversation;
mod event;
mod message;
mod turn;

pub use conversation::*;
pub use event::*;
pub use message::*;
pub use turn::*;
