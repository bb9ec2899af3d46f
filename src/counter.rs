use crate::thread_local::ThreadId;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};

const STRIPES: usize = 8;

/// A striped additive cardinality counter (§4.2). Each thread hashes to a
/// stripe by its `ThreadId`, so concurrent `add` calls from different
/// threads rarely contend on the same cache line — grounded in the
/// teacher's use of `crossbeam_utils::CachePadded` for contended counters.
pub struct Counter {
    stripes: Vec<CachePadded<AtomicI64>>,
}

impl Counter {
    pub fn new() -> Self {
        let mut stripes = Vec::with_capacity(STRIPES);
        stripes.resize_with(STRIPES, || CachePadded::new(AtomicI64::new(0)));
        Self { stripes }
    }

    fn stripe(&self) -> &AtomicI64 {
        let idx = (ThreadId::current().as_u16() as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    pub fn add(&self, delta: i64) {
        self.stripe().fetch_add(delta, Ordering::Relaxed);
    }

    /// Sum across all stripes, clamped at zero: concurrent reads during
    /// in-flight updates can otherwise observe a transient negative total.
    pub fn sum(&self) -> i64 {
        let total: i64 = self.stripes.iter().map(|s| s.load(Ordering::Relaxed)).sum();
        total.max(0)
    }

    /// `size()` as exposed by the public containers: an `i32`, saturating
    /// rather than wrapping if the true cardinality overflows it.
    pub fn size(&self) -> i32 {
        self.sum().min(i32::MAX as i64) as i32
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_at_zero() {
        let counter = Counter::new();
        assert_eq!(counter.sum(), 0);
        assert_eq!(counter.size(), 0);
    }

    #[test]
    fn add_and_subtract_across_threads() {
        let counter = Arc::new(Counter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    counter.add(1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.sum(), 8000);
    }

    #[test]
    fn sum_never_reports_negative() {
        let counter = Counter::new();
        counter.add(-5);
        assert_eq!(counter.sum(), 0);
    }
}
