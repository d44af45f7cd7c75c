//! Shared protocol definitions for Meshcall
//!
//! The message contract a client needs from its signaling relay: room
//! membership events, per-peer negotiation payloads and chat relay.

pub mod messages;
pub mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use types::*;
