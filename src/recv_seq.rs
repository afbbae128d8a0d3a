use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The single process-global ordering tiebreaker (§3, §5, §9).
///
/// Every ingress event — a depth diff, a trade print, or a recorder-internal
/// event — calls `next()` exactly once. The allocator is the only piece of
/// mutable state shared across tasks; everything else flows through
/// message-passing channels instead.
#[derive(Debug, Default)]
pub struct RecvSeqAllocator {
    next: AtomicU64,
}

impl RecvSeqAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: AtomicU64::new(0),
        })
    }

    /// Returns a strictly increasing sequence number starting at 0.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The number of sequence numbers handed out so far, for telemetry.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing_under_contention() {
        let alloc = RecvSeqAllocator::new();
        let mut handles = vec![];
        for _ in 0..8 {
            let alloc = alloc.clone();
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| alloc.next()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        for w in all.windows(2) {
            assert!(w[1] > w[0]);
        }
        assert_eq!(all.len(), 8000);
        assert_eq!(alloc.issued(), 8000);
    }
}
