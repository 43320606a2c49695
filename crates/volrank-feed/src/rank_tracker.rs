//! Live top-N ranking of trading pairs by trailing volume.
//!
//! Volume updates are applied in place and only take effect on the ranking
//! at the next [`RankTracker::recompute_top_n`], which re-sorts the full pair
//! table and reports how the top-N set moved.

use crate::error::{FeedError, FeedResult};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use volrank_core::{Symbol, TradingPair, VolumeUpdate};

/// Symmetric difference between two successive top-N sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankDiff {
    /// Symbols that left the top-N, ordered by current rank.
    pub to_unsubscribe: Vec<Symbol>,
    /// Symbols that entered the top-N, ordered by rank.
    pub to_subscribe: Vec<Symbol>,
}

impl RankDiff {
    pub fn is_empty(&self) -> bool {
        self.to_unsubscribe.is_empty() && self.to_subscribe.is_empty()
    }
}

/// Ranking state over every known pair.
#[derive(Debug)]
pub struct RankTracker {
    top_n: usize,
    /// Pair table in rank order as of the last sort; new listings are
    /// appended until the next recomputation.
    pairs: Vec<TradingPair>,
    index: HashMap<Symbol, usize>,
    /// Current top-N. `None` until the first snapshot.
    ranked: Option<Vec<Symbol>>,
}

impl RankTracker {
    pub fn new(top_n: usize) -> Self {
        Self {
            top_n,
            pairs: Vec::new(),
            index: HashMap::new(),
            ranked: None,
        }
    }

    pub fn top_n_size(&self) -> usize {
        self.top_n
    }

    pub fn is_initialized(&self) -> bool {
        self.ranked.is_some()
    }

    /// Seed the table from an unordered snapshot and establish the baseline
    /// top-N, which is returned in rank order.
    ///
    /// Duplicate symbols keep the last volume seen; non-finite volumes are
    /// skipped.
    pub fn initialize(
        &mut self,
        snapshot: impl IntoIterator<Item = VolumeUpdate>,
    ) -> FeedResult<Vec<Symbol>> {
        if self.is_initialized() {
            return Err(FeedError::AlreadyInitialized);
        }

        for update in snapshot {
            if let Err(e) = self.apply_volume_update(&update) {
                warn!(error = %e, "Skipping snapshot entry");
            }
        }

        self.sort_and_rank();
        let top = self.current_top();
        info!(
            pairs = self.pairs.len(),
            top_n = top.len(),
            "Rank tracker initialized"
        );
        self.ranked = Some(top.clone());
        Ok(top)
    }

    /// Record the latest trailing volume of one pair. Does not re-rank.
    pub fn apply_volume_update(&mut self, update: &VolumeUpdate) -> FeedResult<()> {
        if !update.volume.is_finite() {
            return Err(FeedError::InvalidVolume {
                symbol: update.symbol.to_string(),
                value: update.volume,
            });
        }

        match self.index.get(&update.symbol) {
            Some(&pos) => self.pairs[pos].volume = update.volume,
            None => {
                let pos = self.pairs.len();
                let mut pair = TradingPair::new(update.symbol.clone(), update.volume);
                pair.rank = pos;
                if self.is_initialized() {
                    debug!(symbol = %update.symbol, "New pair listed");
                }
                self.index.insert(update.symbol.clone(), pos);
                self.pairs.push(pair);
            }
        }
        Ok(())
    }

    /// Re-sort every pair, reassign ranks and diff the new top-N against
    /// the previous one. Before initialization this is a no-op.
    pub fn recompute_top_n(&mut self) -> RankDiff {
        let Some(previous) = self.ranked.take() else {
            return RankDiff::default();
        };

        self.sort_and_rank();
        let next = self.current_top();

        let previous_set: HashSet<&Symbol> = previous.iter().collect();
        let next_set: HashSet<&Symbol> = next.iter().collect();

        let to_subscribe: Vec<Symbol> = next
            .iter()
            .filter(|s| !previous_set.contains(s))
            .cloned()
            .collect();
        let mut to_unsubscribe: Vec<Symbol> = previous
            .iter()
            .filter(|s| !next_set.contains(s))
            .cloned()
            .collect();
        to_unsubscribe.sort_by_key(|s| self.index.get(s).copied().unwrap_or(usize::MAX));

        let diff = RankDiff {
            to_unsubscribe,
            to_subscribe,
        };
        if !diff.is_empty() {
            debug!(
                out = ?diff.to_unsubscribe,
                into = ?diff.to_subscribe,
                "Top-N changed"
            );
        }

        self.ranked = Some(next);
        diff
    }

    /// Current top-N in rank order (empty before initialization).
    pub fn top(&self) -> &[Symbol] {
        self.ranked.as_deref().unwrap_or(&[])
    }

    pub fn pair(&self, symbol: &Symbol) -> Option<&TradingPair> {
        self.index.get(symbol).map(|&pos| &self.pairs[pos])
    }

    /// Every known pair, in rank order as of the last recomputation.
    pub fn pairs(&self) -> &[TradingPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    // Stable: equal volumes keep their previous relative order.
    fn sort_and_rank(&mut self) {
        self.pairs.sort_by(|a, b| b.volume.total_cmp(&a.volume));
        self.index.clear();
        for (rank, pair) in self.pairs.iter_mut().enumerate() {
            pair.rank = rank;
            self.index.insert(pair.symbol.clone(), rank);
        }
    }

    fn current_top(&self) -> Vec<Symbol> {
        self.pairs
            .iter()
            .take(self.top_n)
            .map(|p| p.symbol.clone())
            .collect()
    }
}
