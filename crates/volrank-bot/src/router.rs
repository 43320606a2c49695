//! Keeps one trade connection per top-N symbol.
//!
//! Connections are created at startup. When the ranking moves, the
//! connection of each outgoing symbol is migrated to an incoming symbol
//! (unsubscribe, then subscribe) instead of being torn down. A new
//! connection is opened only when incoming symbols outnumber the pool.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use volrank_core::Symbol;
use volrank_feed::RankDiff;
use volrank_ws::StreamControl;

/// Symbol-to-connection index over a fixed pool of stream connections.
pub struct SubscriptionRouter<C: StreamControl> {
    by_symbol: HashMap<Symbol, Arc<C>>,
    /// Connections with no symbol, kept for later incoming symbols.
    idle: Vec<Arc<C>>,
}

impl<C: StreamControl> Default for SubscriptionRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: StreamControl> SubscriptionRouter<C> {
    pub fn new() -> Self {
        Self {
            by_symbol: HashMap::new(),
            idle: Vec::new(),
        }
    }

    /// Open one connection per symbol with `factory`.
    pub fn open<F>(&mut self, top: &[Symbol], mut factory: F)
    where
        F: FnMut(&Symbol) -> Arc<C>,
    {
        for symbol in top {
            if self.by_symbol.contains_key(symbol) {
                continue;
            }
            let conn = factory(symbol);
            self.by_symbol.insert(symbol.clone(), conn);
        }
        info!(connections = self.connection_count(), "Trade connections opened");
    }

    /// Move connections from outgoing to incoming symbols. Returns the
    /// number of connections that changed symbol. Incoming symbols left
    /// over once the idle pool is empty get a connection from `factory`.
    pub fn reconcile<F>(&mut self, diff: &RankDiff, mut factory: F) -> usize
    where
        F: FnMut(&Symbol) -> Arc<C>,
    {
        if diff.is_empty() {
            return 0;
        }

        let mut migrated = 0;
        let mut incoming = diff.to_subscribe.iter();

        for outgoing in &diff.to_unsubscribe {
            let Some(conn) = self.by_symbol.remove(outgoing) else {
                warn!(symbol = %outgoing, "No connection for outgoing symbol");
                continue;
            };

            if let Err(e) = conn.unsubscribe(&outgoing.trade_stream()) {
                warn!(symbol = %outgoing, error = %e, "Unsubscribe failed");
            }

            match incoming.next() {
                Some(next) => {
                    info!(from = %outgoing, to = %next, "Migrating trade connection");
                    self.assign(conn, next);
                    migrated += 1;
                }
                None => {
                    debug!(symbol = %outgoing, "Parking connection as idle");
                    self.idle.push(conn);
                }
            }
        }

        for next in incoming {
            match self.idle.pop() {
                Some(conn) => {
                    info!(to = %next, "Reusing idle trade connection");
                    self.assign(conn, next);
                    migrated += 1;
                }
                None => {
                    info!(symbol = %next, "Opening trade connection for new top-N symbol");
                    let conn = factory(next);
                    self.by_symbol.insert(next.clone(), conn);
                }
            }
        }

        migrated
    }

    // A failed subscribe still records the desired stream, so the next
    // reconnect picks it up.
    fn assign(&mut self, conn: Arc<C>, symbol: &Symbol) {
        if let Err(e) = conn.subscribe(&symbol.trade_stream()) {
            warn!(symbol = %symbol, error = %e, "Subscribe failed, will resume on reconnect");
        }
        self.by_symbol.insert(symbol.clone(), conn);
    }

    /// Live plus idle connections.
    pub fn connection_count(&self) -> usize {
        self.by_symbol.len() + self.idle.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn connection_for(&self, symbol: &Symbol) -> Option<&Arc<C>> {
        self.by_symbol.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.by_symbol.keys()
    }

    /// Close and forget every connection.
    pub fn close_all(&mut self) {
        for conn in self.by_symbol.values().chain(self.idle.iter()) {
            conn.close();
        }
        info!(connections = self.connection_count(), "Trade connections closed");
        self.by_symbol.clear();
        self.idle.clear();
    }
}
