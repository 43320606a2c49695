//! Integration tests for volrank-bot.
//!
//! These tests run real connections against local mock servers:
//! - stream connection lifecycle and keep-alive reconnects
//! - rank-driven migration of trade connections
//! - the full application startup and shutdown path

pub mod common;
