use crate::descriptor::TransferDescriptor;
use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Which direction a migration worker scans in (§4.5). Recorded on every
/// forwarding marker so a worker recognizes its own markers versus its
/// counterpart's when the two scans meet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// A sentinel installed into a source slot mid-resize. Any operation that
/// loads one chases `descriptor.next()` at the mapped index instead of
/// treating it as a value.
pub struct ForwardMarker<T> {
    pub descriptor: Arc<TransferDescriptor<T>>,
    pub side: Side,
}

impl<T> Clone for ForwardMarker<T> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            side: self.side,
        }
    }
}

/// The tagged union every cell holds: absent, a user value, or a forwarding
/// marker. A `Cell` never observes an uninitialized read — it starts life
/// as `Empty` and every replacement goes through one of these three states.
pub enum Slot<T> {
    Empty,
    Value(T),
    Fwd(ForwardMarker<T>),
}

/// One atomically-updated array cell: acquire-load, release-store, strong
/// and weak compare-and-set, and exchange, all on a single `Slot<T>`.
pub struct Cell<T> {
    slot: Atomic<Slot<T>>,
}

impl<T> Cell<T> {
    pub fn empty() -> Self {
        Self {
            slot: Atomic::new(Slot::Empty),
        }
    }

    pub fn load_acquire<'g>(&self, guard: &'g Guard) -> Shared<'g, Slot<T>> {
        self.slot.load(Ordering::Acquire, guard)
    }

    /// Publish `new` with release ordering, retiring whatever was there.
    pub fn store_release(&self, new: Slot<T>, guard: &Guard) {
        let old = self.slot.swap(Owned::new(new), Ordering::Release, guard);
        if !old.is_null() {
            unsafe { guard.defer_destroy(old) };
        }
    }

    /// Atomically replace the slot, handing back the previous value for the
    /// caller to inspect and retire.
    pub fn exchange<'g>(&self, new: Slot<T>, guard: &'g Guard) -> Shared<'g, Slot<T>> {
        self.slot.swap(Owned::new(new), Ordering::AcqRel, guard)
    }

    /// Strong compare-and-set. Never fails spuriously; a single call either
    /// installs `new` or reports the value that beat it.
    pub fn cas<'g>(
        &self,
        current: Shared<'g, Slot<T>>,
        new: Slot<T>,
        guard: &'g Guard,
    ) -> Result<(), Shared<'g, Slot<T>>> {
        self.slot
            .compare_and_set(current, Owned::new(new), Ordering::AcqRel, guard)
            .map(|_| ())
            .map_err(|e| e.current)
    }

    /// Weak compare-and-set: may fail even when `current` still matches.
    /// Used in the migration retry loop (§4.5) to reduce contended-CAS bus
    /// traffic since the caller already retries on mismatch.
    pub fn weak_cas<'g>(
        &self,
        current: Shared<'g, Slot<T>>,
        new: Slot<T>,
        guard: &'g Guard,
    ) -> Result<(), Shared<'g, Slot<T>>> {
        self.slot
            .compare_and_set_weak(current, Owned::new(new), Ordering::AcqRel, guard)
            .map(|_| ())
            .map_err(|e| e.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_epoch::pin;

    #[test]
    fn starts_empty() {
        let cell: Cell<u32> = Cell::empty();
        let guard = pin();
        assert!(matches!(
            unsafe { cell.load_acquire(&guard).as_ref() },
            Some(Slot::Empty)
        ));
    }

    #[test]
    fn exchange_returns_previous() {
        let cell = Cell::empty();
        let guard = pin();
        let prev = cell.exchange(Slot::Value(7u32), &guard);
        assert!(matches!(unsafe { prev.as_ref() }, Some(Slot::Empty)));
        let prev = cell.exchange(Slot::Value(9u32), &guard);
        assert!(matches!(unsafe { prev.as_ref() }, Some(Slot::Value(7))));
    }

    #[test]
    fn cas_rejects_stale_expected() {
        let cell = Cell::empty();
        let guard = pin();
        let stale = cell.load_acquire(&guard);
        cell.store_release(Slot::Value(1u32), &guard);
        let result = cell.cas(stale, Slot::Value(2u32), &guard);
        assert!(result.is_err());
    }
}
