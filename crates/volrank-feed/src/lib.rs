//! Market feed processing for volrank.
//!
//! Turns raw stream frames into domain events, keeps the live volume
//! ranking and the account balance book.

pub mod balances;
pub mod error;
pub mod parser;
pub mod rank_tracker;

pub use balances::BalanceBook;
pub use error::{FeedError, FeedResult};
pub use parser::{MessageParser, ParseStats, UserEvent};
pub use rank_tracker::{RankDiff, RankTracker};
