use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

const U14_MAX: u64 = 16383;

// 14bit thread id, reused here purely to pick a stable stripe for the
// cardinality counter without hashing the platform thread handle.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct ThreadId(u16);

thread_local! {
    pub static THREAD_ID: ThreadId = ThreadId::new();
}

impl ThreadId {
    pub fn new() -> Self {
        let curr = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        if curr >= U14_MAX - 1 {
            panic!("more than 16000 threads were created");
        }
        ThreadId(curr as u16)
    }

    pub fn current() -> Self {
        THREAD_ID.with(|id| *id)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadId;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn distinct_threads_get_distinct_ids() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let seen = seen.clone();
            handles.push(thread::spawn(move || {
                let id = ThreadId::current();
                seen.lock().unwrap().insert(id.as_u16());
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), 8);
    }

    #[test]
    fn current_is_stable_within_a_thread() {
        assert_eq!(ThreadId::current(), ThreadId::current());
    }
}
