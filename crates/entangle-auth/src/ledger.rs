//! Per-peer attempt accounting for rate limiting and timeouts

use chrono::{DateTime, Utc};
use entangle_core::PeerAddress;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Bookkeeping for one peer
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Failed verifications so far
    pub count: u32,
    /// Monotonic time of first contact, used for the timeout window
    pub first_seen: Instant,
    /// Wall-clock time of first contact, for display
    pub first_seen_at: DateTime<Utc>,
}

/// Attempt counters keyed by peer address.
///
/// Pure bookkeeping: callers pass `now` explicitly. Entries live as long as
/// the ledger.
#[derive(Debug, Default)]
pub struct AttemptLedger {
    records: HashMap<PeerAddress, AttemptRecord>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `peer` if it is not tracked yet
    pub fn record_contact(&mut self, peer: &PeerAddress, now: Instant) -> &AttemptRecord {
        self.records
            .entry(peer.clone())
            .or_insert_with(|| AttemptRecord {
                count: 0,
                first_seen: now,
                first_seen_at: Utc::now(),
            })
    }

    /// Count a failed verification, returning the new total
    pub fn record_failure(&mut self, peer: &PeerAddress, now: Instant) -> u32 {
        self.record_contact(peer, now);
        match self.records.get_mut(peer) {
            Some(record) => {
                record.count += 1;
                record.count
            }
            None => 0,
        }
    }

    pub fn get(&self, peer: &PeerAddress) -> Option<&AttemptRecord> {
        self.records.get(peer)
    }

    /// Time since first contact, if the peer is known
    pub fn elapsed(&self, peer: &PeerAddress, now: Instant) -> Option<Duration> {
        self.records
            .get(peer)
            .map(|record| now.saturating_duration_since(record.first_seen))
    }

    /// Whether the peer's window of `timeout` since first contact has run out
    pub fn is_timed_out(&self, peer: &PeerAddress, timeout: Duration, now: Instant) -> bool {
        self.elapsed(peer, now)
            .is_some_and(|elapsed| elapsed >= timeout)
    }

    /// Whether the peer has used up `max_attempts` failures
    pub fn is_locked_out(&self, peer: &PeerAddress, max_attempts: u32) -> bool {
        self.records
            .get(peer)
            .is_some_and(|record| record.count >= max_attempts)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
