//! Core domain types for the volrank market-data client.
//!
//! This crate provides the types shared by every other crate:
//! - `Symbol`: exchange trading pair identifier and its stream names
//! - `TradingPair`: a symbol with its trailing volume and rank
//! - `AssetBalance`: free/locked amounts of one account asset
//! - `VolumeUpdate`, `TradeTick`: decoded market events

pub mod error;
pub mod symbol;
pub mod types;

pub use error::{CoreError, Result};
pub use symbol::Symbol;
pub use types::{AssetBalance, TradeTick, TradingPair, VolumeUpdate};
