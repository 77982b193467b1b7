//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    authorizations: AtomicU64,
    denials: AtomicU64,
    agent_invocations: AtomicU64,
    fan_out_items_skipped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            authorizations: AtomicU64::new(0),
            denials: AtomicU64::new(0),
            agent_invocations: AtomicU64::new(0),
            fan_out_items_skipped: AtomicU64::new(0),
        }
    }

    pub fn inc_authorizations(&self) {
        self.authorizations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "authorizations", "counter incremented");
    }

    pub fn inc_denials(&self) {
        self.denials.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "denials", "counter incremented");
    }

    pub fn inc_agent_invocations(&self) {
        self.agent_invocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "agent_invocations", "counter incremented");
    }

    pub fn inc_fan_out_items_skipped(&self) {
        self.fan_out_items_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fan_out_items_skipped", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run) rather than on every
    /// increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            authorizations = self.authorizations(),
            denials = self.denials(),
            agent_invocations = self.agent_invocations(),
            fan_out_items_skipped = self.fan_out_items_skipped(),
        );
    }

    pub fn authorizations(&self) -> u64 {
        self.authorizations.load(Ordering::Relaxed)
    }

    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::Relaxed)
    }

    pub fn agent_invocations(&self) -> u64 {
        self.agent_invocations.load(Ordering::Relaxed)
    }

    pub fn fan_out_items_skipped(&self) -> u64 {
        self.fan_out_items_skipped.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.authorizations.store(0, Ordering::Relaxed);
        self.denials.store(0, Ordering::Relaxed);
        self.agent_invocations.store(0, Ordering::Relaxed);
        self.fan_out_items_skipped.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.authorizations(), 0);
        m.inc_authorizations();
        m.inc_authorizations();
        m.inc_denials();
        assert_eq!(m.authorizations(), 2);
        assert_eq!(m.denials(), 1);

        m.inc_agent_invocations();
        m.inc_fan_out_items_skipped();
        assert_eq!(m.agent_invocations(), 1);
        assert_eq!(m.fan_out_items_skipped(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_authorizations();
        m.inc_denials();
        m.inc_agent_invocations();
        m.reset();
        assert_eq!(m.authorizations(), 0);
        assert_eq!(m.denials(), 0);
        assert_eq!(m.agent_invocations(), 0);
    }
}
