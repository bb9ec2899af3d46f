use crate::atomic::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

/// One generation of a resizable array's backing storage: a flat run of
/// cells. Never mutated in place once published — a resize builds a new
/// `Backing` and swaps the container's pointer to it.
pub struct Backing<T> {
    cells: Vec<Cell<T>>,
}

impl<T> Backing<T> {
    pub fn with_len(len: usize) -> Self {
        let mut cells = Vec::with_capacity(len);
        cells.resize_with(len, Cell::empty);
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, index: usize) -> &Cell<T> {
        &self.cells[index]
    }
}

/// Shared state for one resize operation (§4.5). Lives behind an `Arc` so
/// every forwarding marker installed during the transfer can hold a
/// reference back to the descriptor that created it.
///
/// `prev`/`next` are raw pointers rather than `Arc<Backing<T>>` because the
/// container itself owns backing arrays through a plain `AtomicPtr` (see
/// `ConcurrentArray`); a descriptor only ever observes arrays the container
/// keeps alive for the descriptor's own lifetime.
pub struct TransferDescriptor<T> {
    prev: *const Backing<T>,
    next: *const Backing<T>,
    src_off: usize,
    dst_off: usize,
    len: usize,
    done: AtomicBool,
}

unsafe impl<T: Send> Send for TransferDescriptor<T> {}
unsafe impl<T: Sync> Sync for TransferDescriptor<T> {}

impl<T> TransferDescriptor<T> {
    pub fn new(
        prev: *const Backing<T>,
        next: *const Backing<T>,
        src_off: usize,
        dst_off: usize,
        len: usize,
    ) -> Self {
        Self {
            prev,
            next,
            src_off,
            dst_off,
            len,
            done: AtomicBool::new(false),
        }
    }

    /// Safety: valid for the descriptor's lifetime — the container keeps
    /// both generations alive until the descriptor is dropped.
    pub fn prev(&self) -> &Backing<T> {
        unsafe { &*self.prev }
    }

    pub fn next(&self) -> &Backing<T> {
        unsafe { &*self.next }
    }

    pub fn src_off(&self) -> usize {
        self.src_off
    }

    pub fn dst_off(&self) -> usize {
        self.dst_off
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Maps a source-array index into the destination array, or `None` if
    /// it falls outside this descriptor's transfer window.
    pub fn map_index(&self, src_index: usize) -> Option<usize> {
        if src_index < self.src_off || src_index >= self.src_off + self.len {
            return None;
        }
        Some(src_index - self.src_off + self.dst_off)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_index_respects_window() {
        let prev = Backing::<u32>::with_len(4);
        let next = Backing::<u32>::with_len(8);
        let descriptor = TransferDescriptor::new(&prev, &next, 0, 0, 4);
        assert_eq!(descriptor.map_index(0), Some(0));
        assert_eq!(descriptor.map_index(3), Some(3));
        assert_eq!(descriptor.map_index(4), None);
    }

    #[test]
    fn mark_done_is_observed() {
        let prev = Backing::<u32>::with_len(1);
        let next = Backing::<u32>::with_len(1);
        let descriptor = TransferDescriptor::new(&prev, &next, 0, 0, 1);
        assert!(!descriptor.is_done());
        descriptor.mark_done();
        assert!(descriptor.is_done());
    }
}
