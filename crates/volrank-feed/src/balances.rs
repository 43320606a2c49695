//! Account balance book.

use crate::parser::UserEvent;
use std::collections::BTreeMap;
use tracing::debug;
use volrank_core::AssetBalance;

/// Balances per asset code, seeded from the account snapshot and kept
/// current from user-data events.
#[derive(Debug, Default)]
pub struct BalanceBook {
    balances: BTreeMap<String, AssetBalance>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole book with an account snapshot.
    pub fn seed(&mut self, snapshot: impl IntoIterator<Item = (String, AssetBalance)>) {
        self.balances = snapshot.into_iter().collect();
        debug!(assets = self.balances.len(), "Balance book seeded");
    }

    /// Apply a user-data event. Returns whether any balance changed.
    pub fn apply(&mut self, event: &UserEvent) -> bool {
        match event {
            UserEvent::AccountPosition(entries) => {
                for (asset, balance) in entries {
                    self.balances.insert(asset.clone(), *balance);
                }
                !entries.is_empty()
            }
            UserEvent::BalanceUpdate { asset, delta } => {
                let entry = self.balances.entry(asset.clone()).or_default();
                entry.free += *delta;
                true
            }
            UserEvent::Other => false,
        }
    }

    pub fn get(&self, asset: &str) -> Option<AssetBalance> {
        self.balances.get(asset).copied()
    }

    /// Assets holding a non-zero total, sorted by asset code.
    pub fn non_zero(&self) -> Vec<(&str, AssetBalance)> {
        self.balances
            .iter()
            .filter(|(_, b)| !b.is_zero())
            .map(|(a, b)| (a.as_str(), *b))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}
