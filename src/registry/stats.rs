//! Statistics for the payload registry

use std::sync::atomic::{AtomicU64, Ordering};

/// Global payload statistics
#[derive(Debug, Default)]
pub struct PloadStats {
    /// Payloads allocated
    pub allocated: AtomicU64,
    /// Payloads ended
    pub ended: AtomicU64,
    /// Raw bytes passed to append
    pub bytes_appended: AtomicU64,
    /// Listener attachments created
    pub listeners_opened: AtomicU64,
    /// Listeners dropped after a failed write
    pub write_failures: AtomicU64,
    /// Stores opened
    pub stores_opened: AtomicU64,
}

/// Point-in-time copy of [`PloadStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PloadStatsSnapshot {
    pub allocated: u64,
    pub ended: u64,
    pub bytes_appended: u64,
    pub listeners_opened: u64,
    pub write_failures: u64,
    pub stores_opened: u64,
}

impl PloadStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads allocated but not ended yet
    pub fn active_payloads(&self) -> u64 {
        let allocated = self.allocated.load(Ordering::Relaxed);
        let ended = self.ended.load(Ordering::Relaxed);
        allocated.saturating_sub(ended)
    }

    pub fn record_alloc(&self) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_end(&self) {
        self.ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, len: usize) {
        self.bytes_appended.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_listener_open(&self) {
        self.listeners_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PloadStatsSnapshot {
        PloadStatsSnapshot {
            allocated: self.allocated.load(Ordering::Relaxed),
            ended: self.ended.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            listeners_opened: self.listeners_opened.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            stores_opened: self.stores_opened.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.allocated.store(0, Ordering::Relaxed);
        self.ended.store(0, Ordering::Relaxed);
        self.bytes_appended.store(0, Ordering::Relaxed);
        self.listeners_opened.store(0, Ordering::Relaxed);
        self.write_failures.store(0, Ordering::Relaxed);
        self.stores_opened.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_payloads() {
        let stats = PloadStats::new();
        stats.record_alloc();
        stats.record_alloc();
        stats.record_end();
        stats.record_bytes(100);

        assert_eq!(stats.active_payloads(), 1);
        let snap = stats.snapshot();
        assert_eq!(snap.allocated, 2);
        assert_eq!(snap.bytes_appended, 100);

        stats.reset();
        assert_eq!(stats.snapshot(), PloadStatsSnapshot::default());
    }
}
