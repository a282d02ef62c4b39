//! Policy configuration for the room coordinator.
//!
//! Rate limits, windows, and grace periods are configuration rather than
//! hard-coded behavior so that tests can vary them.

/// Tunable policy constants for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Room joined automatically on connect and when a join request is blank.
    pub default_room: String,
    /// Maximum display name length, in characters.
    pub name_max_chars: usize,
    /// Maximum chat message length, in characters.
    pub chat_max_chars: usize,
    /// Minimum interval between accepted chat messages per connection.
    pub chat_interval_ms: i64,
    /// Trailing window of beat timestamps retained per profile.
    pub beat_window_ms: i64,
    /// Trailing window used to compute instantaneous beats-per-second.
    pub cps_window_ms: i64,
    /// Floor applied to requested contest durations.
    pub contest_min_secs: u64,
    /// Ceiling applied to requested contest durations.
    pub contest_max_secs: u64,
    /// How long a memberless room may stay idle before the reaper purges it.
    pub idle_grace_ms: i64,
    /// Delay before a disconnect triggers roster updates, coalescing
    /// rapid reconnect/disconnect churn.
    pub disconnect_debounce_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_room: "lobby".to_string(),
            name_max_chars: 32,
            chat_max_chars: 200,
            chat_interval_ms: 800,
            beat_window_ms: 2_000,
            cps_window_ms: 1_000,
            contest_min_secs: 5,
            contest_max_secs: 3_600,
            idle_grace_ms: 300_000,
            disconnect_debounce_ms: 100,
        }
    }
}

impl CoordinatorConfig {
    /// Reaper sweep period: half the idle grace period, clamped to [1s, 60s].
    pub fn reaper_interval_ms(&self) -> u64 {
        ((self.idle_grace_ms / 2).max(0) as u64).clamp(1_000, 60_000)
    }
}
