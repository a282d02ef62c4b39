//! Shared utilities for the Sonic Canvas server.

pub mod logger;
pub mod time;
