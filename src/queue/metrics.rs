use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters for a [`Listener`](super::Listener)
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    /// Messages taken off the channel
    pub received: AtomicU64,
    /// Messages acknowledged after a successful handler run
    pub acked: AtomicU64,
    /// Messages nacked after a handler error or panic
    pub nacked: AtomicU64,
    /// Handler runs currently in progress
    pub in_flight: AtomicUsize,
}

impl ListenerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message handed to a worker
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_nack(&self) {
        self.nacked.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn get_acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn get_nacked(&self) -> u64 {
        self.nacked.load(Ordering::Relaxed)
    }

    pub fn get_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_balance() {
        let m = ListenerMetrics::new();
        m.record_received();
        m.record_received();
        assert_eq!(m.get_in_flight(), 2);
        m.record_ack();
        m.record_nack();
        assert_eq!(m.get_received(), 2);
        assert_eq!(m.get_acked(), 1);
        assert_eq!(m.get_nacked(), 1);
        assert_eq!(m.get_in_flight(), 0);
    }
}
