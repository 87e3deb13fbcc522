use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Tuning for the realtime channel.
///
/// The allowed peer set can be swapped at runtime with
/// [`RealtimeSettings::update_allowed_peers`]; connections opened afterwards
/// see the new set. Readers always observe either the old or the new set.
#[derive(Debug)]
pub struct RealtimeSettings {
    allowed_peers: RwLock<Arc<HashSet<String>>>,
    outbound_queue_capacity: usize,
    max_reconnect_attempts: u32,
    initial_reconnect_delay: Duration,
    max_reconnect_delay: Duration,
    drop_warn_threshold: u64,
    idle_timeout: Duration,
    handshake_timeout: Duration,
}

impl RealtimeSettings {
    /// Counts below one are raised to one and the max delay never falls below the initial delay.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        allowed_peers: impl IntoIterator<Item = String>,
        outbound_queue_capacity: usize,
        max_reconnect_attempts: u32,
        initial_reconnect_delay: Duration,
        max_reconnect_delay: Duration,
        drop_warn_threshold: u64,
        idle_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            allowed_peers: RwLock::new(Arc::new(allowed_peers.into_iter().collect())),
            outbound_queue_capacity: outbound_queue_capacity.max(1),
            max_reconnect_attempts: max_reconnect_attempts.max(1),
            initial_reconnect_delay,
            max_reconnect_delay: max_reconnect_delay.max(initial_reconnect_delay),
            drop_warn_threshold: drop_warn_threshold.max(1),
            idle_timeout,
            handshake_timeout,
        }
    }

    pub fn with_allowed_peers(allowed_peers: impl IntoIterator<Item = String>) -> Self {
        Self::new(
            allowed_peers,
            512,
            10,
            Duration::from_secs(1),
            Duration::from_secs(30),
            10,
            Duration::from_secs(120),
            Duration::from_secs(10),
        )
    }

    /// Whether `server_id` may complete a handshake. An empty set admits everyone.
    pub fn is_allowed_peer(&self, server_id: &str) -> bool {
        let peers = self.peer_set();
        peers.is_empty() || peers.contains(server_id)
    }

    /// Replaces the whole allowed set in one step.
    pub fn update_allowed_peers(&self, peers: impl IntoIterator<Item = String>) {
        let next = Arc::new(peers.into_iter().collect::<HashSet<_>>());
        match self.allowed_peers.write() {
            Ok(mut current) => *current = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn allowed_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peer_set().iter().cloned().collect();
        peers.sort();
        peers
    }

    fn peer_set(&self) -> Arc<HashSet<String>> {
        match self.allowed_peers.read() {
            Ok(peers) => peers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Backoff before reconnect attempt `attempt`.
    ///
    /// Zero for the first attempt, then doubling from the initial delay up to the max delay.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_reconnect_delay
            .checked_mul(factor)
            .unwrap_or(self.max_reconnect_delay)
            .min(self.max_reconnect_delay)
    }

    pub fn outbound_queue_capacity(&self) -> usize {
        self.outbound_queue_capacity
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    pub fn initial_reconnect_delay(&self) -> Duration {
        self.initial_reconnect_delay
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        self.max_reconnect_delay
    }

    pub fn drop_warn_threshold(&self) -> u64 {
        self.drop_warn_threshold
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self::with_allowed_peers(Vec::new())
    }
}
