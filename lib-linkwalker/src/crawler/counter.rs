use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared progress counters. The busy-count that gates termination lives in
/// `CrawlState`; these only feed the progress reporter and the final log
/// line.
#[derive(Debug, Default)]
pub struct Counter {
    /// All items claimed by a worker.
    open_count: AtomicUsize,
    /// All items finished, no matter the outcome.
    closed_count: AtomicUsize,
    /// All items that ended in a broken page.
    error_count: AtomicUsize,
    download_count: AtomicUsize,
}

impl Counter {
    pub fn register_open(&self) {
        self.open_count.fetch_add(1, Ordering::Release);
    }

    pub fn register_closed(&self) {
        self.closed_count.fetch_add(1, Ordering::Release);
    }

    pub fn register_error(&self) {
        self.error_count.fetch_add(1, Ordering::Release);
    }

    pub fn add_to_download_count(&self, amount: usize) {
        self.download_count.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn n_closed(&self) -> usize {
        self.closed_count.load(Ordering::Acquire)
    }

    pub fn n_error(&self) -> usize {
        self.error_count.load(Ordering::Acquire)
    }

    pub fn n_active(&self) -> usize {
        self.open_count.load(Ordering::Acquire) - self.closed_count.load(Ordering::Acquire)
    }

    pub fn n_downloaded(&self) -> usize {
        self.download_count.load(Ordering::Relaxed)
    }
}
