//! Meshcall client library
//!
//! This crate provides the core of a full-mesh conferencing client,
//! including signaling, peer session lifecycle, offer/answer negotiation
//! and local media management.

pub mod call;
pub mod config;
pub mod error;
pub mod media;
pub mod network;
pub mod state;

pub use call::{CallCommand, CallController, CallHandle, CallOptions};
pub use config::ClientConfig;
pub use error::{CallError, Result};
