//! Model availability registry — temporary blacklisting of failing models.
//!
//! A model lands here when an upstream says it is rate-limited (429) or out
//! of credits (402); the router then skips it when building candidate lists.
//! Entries expire implicitly: the `is_available` call that observes an
//! elapsed deadline removes the record. `disable` is last-writer-wins so a
//! fresh failure always extends the cool-down.
//!
//! State is process-local and lost on restart, which is the intent — a
//! restart is a fine moment to re-probe a previously failing model.

use std::time::{Duration, Instant};

use dashmap::DashMap;

pub struct AvailabilityRegistry {
    disabled_until: DashMap<String, Instant>,
}

impl AvailabilityRegistry {
    pub fn new() -> Self {
        Self { disabled_until: DashMap::new() }
    }

    /// Whether `model` may be routed to at `now`.
    ///
    /// Removes the record when the cool-down has elapsed.
    pub fn is_available(&self, model: &str, now: Instant) -> bool {
        let expired = match self.disabled_until.get(model) {
            Some(until) => now >= *until,
            None => return true,
        };
        if expired {
            self.disabled_until.remove(model);
        }
        expired
    }

    /// Disable `model` until `now + duration`, replacing any earlier deadline.
    pub fn disable(&self, model: &str, now: Instant, duration: Duration) {
        self.disabled_until.insert(model.to_string(), now + duration);
    }

    /// Re-enable a model immediately.
    pub fn clear(&self, model: &str) {
        self.disabled_until.remove(model);
    }

    /// Currently disabled models with their remaining cool-down, for
    /// `/backends/status`. Elapsed entries are filtered out (and left for
    /// `is_available` to reap).
    pub fn snapshot(&self, now: Instant) -> Vec<(String, Duration)> {
        let mut out: Vec<(String, Duration)> = self
            .disabled_until
            .iter()
            .filter_map(|entry| {
                let remaining = entry.value().checked_duration_since(now)?;
                Some((entry.key().clone(), remaining))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl Default for AvailabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(300);

    #[test]
    fn unknown_model_is_available() {
        let reg = AvailabilityRegistry::new();
        assert!(reg.is_available("claude-3-haiku", Instant::now()));
    }

    #[test]
    fn disabled_model_is_unavailable_until_deadline() {
        let reg = AvailabilityRegistry::new();
        let t0 = Instant::now();
        reg.disable("m", t0, COOLDOWN);

        assert!(!reg.is_available("m", t0));
        assert!(!reg.is_available("m", t0 + COOLDOWN - Duration::from_secs(1)));
        assert!(reg.is_available("m", t0 + COOLDOWN));
    }

    #[test]
    fn expiry_check_removes_the_record() {
        let reg = AvailabilityRegistry::new();
        let t0 = Instant::now();
        reg.disable("m", t0, COOLDOWN);

        assert!(reg.is_available("m", t0 + COOLDOWN));
        assert!(reg.snapshot(t0).is_empty());
    }

    #[test]
    fn disable_is_last_writer_wins() {
        let reg = AvailabilityRegistry::new();
        let t0 = Instant::now();
        reg.disable("m", t0, Duration::from_secs(600));
        // A later failure with a shorter duration still resets the deadline.
        reg.disable("m", t0 + Duration::from_secs(10), Duration::from_secs(30));

        assert!(!reg.is_available("m", t0 + Duration::from_secs(39)));
        assert!(reg.is_available("m", t0 + Duration::from_secs(40)));
    }

    #[test]
    fn clear_reenables_immediately() {
        let reg = AvailabilityRegistry::new();
        let t0 = Instant::now();
        reg.disable("m", t0, COOLDOWN);
        reg.clear("m");
        assert!(reg.is_available("m", t0));
    }

    #[test]
    fn snapshot_lists_remaining_cooldowns_sorted() {
        let reg = AvailabilityRegistry::new();
        let t0 = Instant::now();
        reg.disable("zeta", t0, Duration::from_secs(100));
        reg.disable("alpha", t0, Duration::from_secs(200));

        let snap = reg.snapshot(t0 + Duration::from_secs(50));
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].0, "alpha");
        assert_eq!(snap[0].1, Duration::from_secs(150));
        assert_eq!(snap[1].0, "zeta");
        assert_eq!(snap[1].1, Duration::from_secs(50));
    }

    #[test]
    fn snapshot_excludes_elapsed_entries() {
        let reg = AvailabilityRegistry::new();
        let t0 = Instant::now();
        reg.disable("m", t0, Duration::from_secs(10));
        assert!(reg.snapshot(t0 + Duration::from_secs(10)).is_empty());
    }
}
