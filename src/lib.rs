//! Sonic Canvas room/session coordinator library.
//!
//! This library provides the server-side coordinator for a shared musical
//! canvas: room membership, per-user stats, timed contests, chat, and idle
//! room reclamation, all delivered over WebSocket broadcast.

// layers
pub mod server;

// shared library
pub mod common;
