//! Opt-in counters, gated by [`crate::config::Config::enable_metrics`].
//!
//! These are plain relaxed-atomic counts, not timers or percentiles — a
//! human-facing stats front-end is an application-level concern layered on
//! top of this crate, not something it renders itself.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the `Source`/`Sink`/back-pressure core as the
/// queue runs.
#[derive(Debug, Default)]
pub struct Metrics {
    records_sent: AtomicU64,
    records_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    push_spins: AtomicU64,
    pop_spins: AtomicU64,
    resynchronisations: AtomicU64,
    registrations: AtomicU64,
    unregistrations: AtomicU64,
    producer_restarts: AtomicU64,
}

/// Point-in-time snapshot of [`Metrics`], cheap to copy and log.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub records_sent: u64,
    pub records_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub push_spins: u64,
    pub pop_spins: u64,
    pub resynchronisations: u64,
    pub registrations: u64,
    pub unregistrations: u64,
    pub producer_restarts: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.records_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_received(&self, bytes: usize) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn push_spin(&self) {
        self.push_spins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn pop_spin(&self) {
        self.pop_spins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn resynchronisation(&self) {
        self.resynchronisations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn unregistration(&self) {
        self.unregistrations.fetch_add(1, Ordering::Relaxed);
    }

    /// A reliable or droppable reader observed a sequence number lower than
    /// one it had already seen — the producer restarted and reset its
    /// sequence numbering to 1.
    #[inline]
    pub(crate) fn producer_restart(&self) {
        self.producer_restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a consistent-enough snapshot for logging or export. Individual
    /// fields are read independently (relaxed), so the snapshot is not an
    /// atomic point-in-time view across fields, only within each one.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_sent: self.records_sent.load(Ordering::Relaxed),
            records_received: self.records_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            push_spins: self.push_spins.load(Ordering::Relaxed),
            pop_spins: self.pop_spins.load(Ordering::Relaxed),
            resynchronisations: self.resynchronisations.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            unregistrations: self.unregistrations.load(Ordering::Relaxed),
            producer_restarts: self.producer_restarts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.record_sent(16);
        m.record_sent(32);
        m.push_spin();
        m.resynchronisation();

        let snap = m.snapshot();
        assert_eq!(snap.records_sent, 2);
        assert_eq!(snap.bytes_sent, 48);
        assert_eq!(snap.push_spins, 1);
        assert_eq!(snap.resynchronisations, 1);
    }
}
