//! Subscription Registry
//!
//! The desired subscription state of one session: which symbols the caller
//! wants per channel. The registry is the source of truth, not a cache of
//! what the server acknowledged. It survives reconnects and is replayed in
//! full after every successful handshake.
//!
//! # Design
//!
//! - One `RwLock` over the whole channel map, so a snapshot taken by the
//!   connection task always sees every caller mutation completely or not
//!   at all.
//! - `desire` and `forget` are idempotent and report only the symbols that
//!   actually changed, which the session turns into incremental frames.
//! - Every effective mutation bumps a generation counter. Snapshots and
//!   changes carry it, so a connection that just replayed a snapshot can
//!   skip queued changes the snapshot already covers.
//! - Account activity uses the single `trade_updates` channel; its symbol
//!   set is irrelevant and desiring the channel means "listen".

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

use crate::domain::streaming::Channel;

// =============================================================================
// Types
// =============================================================================

/// A symbol string (stock ticker or crypto pair such as `BTC/USD`).
pub type Symbol = String;

/// Symbol placeholder stored for channels that carry no symbols.
const CHANNEL_MARKER: &str = "*";

/// Point-in-time copy of the desired subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    channels: BTreeMap<Channel, BTreeSet<Symbol>>,
    generation: u64,
}

impl SubscriptionSnapshot {
    /// Registry generation this snapshot was taken at.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Symbols desired for `channel`, sorted.
    #[must_use]
    pub fn symbols(&self, channel: Channel) -> Vec<Symbol> {
        self.channels
            .get(&channel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `channel` has any desired entry.
    #[must_use]
    pub fn contains_channel(&self, channel: Channel) -> bool {
        self.channels.get(&channel).is_some_and(|s| !s.is_empty())
    }

    /// Whether `symbol` is desired on `channel`.
    #[must_use]
    pub fn contains(&self, channel: Channel, symbol: &str) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|s| s.contains(symbol))
    }

    /// Channels with at least one desired entry, in channel order.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(c, _)| *c)
    }

    /// Iterate `(channel, symbols)` pairs with at least one symbol.
    pub fn iter(&self) -> impl Iterator<Item = (Channel, &BTreeSet<Symbol>)> + '_ {
        self.channels
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(c, s)| (*c, s))
    }

    /// Total number of `(channel, symbol)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.values().map(BTreeSet::len).sum()
    }

    /// Whether nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Thread-safe desired-subscription store for one session.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    channels: BTreeMap<Channel, BTreeSet<Symbol>>,
    generation: u64,
}

impl RegistryState {
    fn insert(&mut self, channel: Channel, symbols: Vec<Symbol>) -> Vec<Symbol> {
        if symbols.is_empty() {
            return vec![];
        }
        let set = self.channels.entry(channel).or_default();
        let added: Vec<Symbol> = symbols
            .into_iter()
            .filter(|symbol| set.insert(symbol.clone()))
            .collect();
        if !added.is_empty() {
            self.generation += 1;
        }
        added
    }

    fn remove(&mut self, channel: Channel, symbols: Vec<Symbol>) -> Vec<Symbol> {
        let Some(set) = self.channels.get_mut(&channel) else {
            return vec![];
        };
        let removed: Vec<Symbol> = symbols
            .into_iter()
            .filter(|symbol| set.remove(symbol))
            .collect();
        if set.is_empty() {
            self.channels.remove(&channel);
        }
        if !removed.is_empty() {
            self.generation += 1;
        }
        removed
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols to a channel.
    ///
    /// Returns the symbols that were not already desired. `trade_updates`
    /// ignores the symbols and desires the channel itself; on market
    /// channels an empty or blank list changes nothing.
    pub fn desire<I, S>(&self, channel: Channel, symbols: I) -> Vec<Symbol>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.state.write().insert(channel, normalize(channel, symbols))
    }

    /// Remove symbols from a channel.
    ///
    /// Returns the symbols that were actually desired before the call.
    /// `trade_updates` forgets the channel itself.
    pub fn forget<I, S>(&self, channel: Channel, symbols: I) -> Vec<Symbol>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.state.write().remove(channel, normalize(channel, symbols))
    }

    /// Apply a subscribe or unsubscribe and describe what changed.
    ///
    /// Returns `None` when the registry already matched the request.
    pub fn apply<I, S>(
        &self,
        action: SubscriptionAction,
        channel: Channel,
        symbols: I,
    ) -> Option<SubscriptionChange>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let symbols = normalize(channel, symbols);
        let mut state = self.state.write();
        let changed = match action {
            SubscriptionAction::Subscribe => state.insert(channel, symbols),
            SubscriptionAction::Unsubscribe => state.remove(channel, symbols),
        };
        SubscriptionChange::new(action, channel, changed, state.generation)
    }

    /// Consistent copy of every desired subscription.
    #[must_use]
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        let state = self.state.read();
        SubscriptionSnapshot {
            channels: state.channels.clone(),
            generation: state.generation,
        }
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Whether `symbol` is currently desired on `channel`.
    #[must_use]
    pub fn is_desired(&self, channel: Channel, symbol: &str) -> bool {
        self.state
            .read()
            .channels
            .get(&channel)
            .is_some_and(|s| s.contains(symbol))
    }

    /// Number of desired `(channel, symbol)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().channels.values().map(BTreeSet::len).sum()
    }

    /// Whether nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Changes
// =============================================================================

/// Direction of a subscription change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionAction {
    /// Start receiving.
    Subscribe,
    /// Stop receiving.
    Unsubscribe,
}

impl SubscriptionAction {
    /// Wire action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// An incremental change the registry actually applied, to be forwarded to
/// a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionChange {
    /// Subscribe or unsubscribe.
    pub action: SubscriptionAction,
    /// Affected channel.
    pub channel: Channel,
    /// Symbols whose membership changed.
    pub symbols: Vec<Symbol>,
    /// Registry generation after the change.
    pub generation: u64,
}

impl SubscriptionChange {
    /// Build a change; `None` when nothing changed.
    #[must_use]
    pub fn new(
        action: SubscriptionAction,
        channel: Channel,
        symbols: Vec<Symbol>,
        generation: u64,
    ) -> Option<Self> {
        (!symbols.is_empty()).then_some(Self {
            action,
            channel,
            symbols,
            generation,
        })
    }
}

/// Deduplicate and drop blanks. `trade_updates` is keyed by the channel
/// marker alone.
fn normalize<I, S>(channel: Channel, symbols: I) -> Vec<Symbol>
where
    I: IntoIterator<Item = S>,
    S: Into<Symbol>,
{
    if channel == Channel::TradeUpdates {
        return vec![CHANNEL_MARKER.to_string()];
    }

    let mut seen = BTreeSet::new();
    symbols
        .into_iter()
        .map(Into::into)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Whether a registry symbol is the channel-only marker.
#[must_use]
pub fn is_channel_marker(symbol: &str) -> bool {
    symbol == CHANNEL_MARKER
}

// =============================================================================
// Tests
// =============================================================================
