use crate::atomic::{ForwardMarker, Side, Slot};
use crate::descriptor::{Backing, TransferDescriptor};
use crossbeam_epoch::{pin, Guard};
use crossbeam_utils::Backoff;
use std::sync::Arc;

/// A slot's value once forwarding markers have been chased to their end.
pub enum Resolved<T> {
    Empty,
    Value(T),
}

/// Follows forwarding markers starting at `(backing, idx)` until it reaches
/// a leaf `Empty` or `Value`. Used both by the plain read path and by a
/// migrating worker that meets a marker from the other direction (§4.5,
/// "Rebase on foreign descriptor marker").
pub fn resolve_slot<T: Clone>(backing: &Backing<T>, idx: usize, guard: &Guard) -> Resolved<T> {
    let mut backing = backing;
    let mut idx = idx;
    loop {
        let shared = backing.cell(idx).load_acquire(guard);
        match unsafe { shared.as_ref() } {
            None | Some(Slot::Empty) => return Resolved::Empty,
            Some(Slot::Value(v)) => return Resolved::Value(v.clone()),
            Some(Slot::Fwd(marker)) => {
                let next_backing = marker.descriptor.next();
                let next_idx = marker
                    .descriptor
                    .map_index(idx)
                    .expect("forwarding marker always maps its own index");
                backing = next_backing;
                idx = next_idx;
            }
        }
    }
}

/// Moves one slot of a resize's transfer window from `prev[src]` to
/// `next[dst]`, installing a forwarding marker in the source slot so
/// concurrent readers and the other-direction worker see a consistent
/// happens-before edge (§4.5).
fn migrate_slot<T: Clone>(descriptor: &Arc<TransferDescriptor<T>>, side: Side, src_idx: usize, guard: &Guard) {
    let dst_idx = descriptor
        .map_index(src_idx)
        .expect("caller only drives indices inside the transfer window");
    let backoff = Backoff::new();

    loop {
        let src_cell = descriptor.prev().cell(src_idx);
        let current = src_cell.load_acquire(guard);

        let resolved = match unsafe { current.as_ref() } {
            None | Some(Slot::Empty) => Resolved::Empty,
            Some(Slot::Value(v)) => Resolved::Value(v.clone()),
            Some(Slot::Fwd(marker)) => {
                if Arc::ptr_eq(&marker.descriptor, descriptor) && marker.side == side {
                    // Already migrated by this exact descriptor on this
                    // side (or a concurrent helper running the same side
                    // of the same resize). Nothing left to do.
                    return;
                }
                // Either the other-direction worker of this same resize
                // forwarded the slot first, or a foreign descriptor (a
                // concurrent resize racing this one) claimed it. Either
                // way, resolve through the marker and commit the result
                // on our own behalf rather than assuming it's already ours.
                resolve_slot(marker.descriptor.next(), marker.descriptor.map_index(src_idx).unwrap(), guard)
            }
        };

        let marker = Slot::Fwd(ForwardMarker {
            descriptor: descriptor.clone(),
            side,
        });

        if src_cell.weak_cas(current, marker, guard).is_err() {
            backoff.spin();
            continue;
        }

        let dst_cell = descriptor.next().cell(dst_idx);
        let value_slot = match resolved {
            Resolved::Empty => Slot::Empty,
            Resolved::Value(v) => Slot::Value(v),
        };
        dst_cell.store_release(value_slot, guard);
        return;
    }
}

/// Drives one full pass of a transfer window in the given direction,
/// migrating every slot it hasn't already forwarded. Multiple workers
/// (the resizing thread's own side plus any number of helpers calling
/// [`help`]) may run this concurrently and safely: `migrate_slot`'s
/// same-direction check makes repeat work a no-op.
pub fn run_worker<T: Clone>(descriptor: &Arc<TransferDescriptor<T>>, side: Side) {
    let len = descriptor.len();
    let indices: Box<dyn Iterator<Item = usize>> = match side {
        Side::Left => Box::new(0..len),
        Side::Right => Box::new((0..len).rev()),
    };

    let guard = pin();
    for offset in indices {
        let src_idx = descriptor.src_off() + offset;
        migrate_slot(descriptor, side, src_idx, &guard);
    }
    descriptor.mark_done();
}

/// Any thread may call this to help a resize complete; it runs a full
/// right-to-left pass independently of the resizing thread's own
/// left-to-right pass (§4.5's "rightHelper" — modeled here as "anyone may
/// help" rather than a single elected helper, since the per-slot protocol
/// is idempotent under concurrent same-direction workers).
pub fn help<T: Clone>(descriptor: &Arc<TransferDescriptor<T>>) {
    run_worker(descriptor, Side::Right);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::Slot;

    fn make_descriptor(prev_len: usize, next_len: usize) -> Arc<TransferDescriptor<i32>> {
        let prev = Box::into_raw(Box::new(Backing::with_len(prev_len)));
        let next = Box::into_raw(Box::new(Backing::with_len(next_len)));
        Arc::new(TransferDescriptor::new(prev, next, 0, 0, prev_len))
    }

    #[test]
    fn migrates_values_and_marks_source() {
        let descriptor = make_descriptor(4, 8);
        let guard = pin();
        descriptor
            .prev()
            .cell(1)
            .store_release(Slot::Value(42), &guard);

        run_worker(&descriptor, Side::Left);

        let guard = pin();
        match unsafe { descriptor.next().cell(1).load_acquire(&guard).as_ref() } {
            Some(Slot::Value(v)) => assert_eq!(*v, 42),
            _ => panic!("expected migrated value"),
        }
        match unsafe { descriptor.prev().cell(1).load_acquire(&guard).as_ref() } {
            Some(Slot::Fwd(marker)) => assert_eq!(marker.side, Side::Left),
            _ => panic!("expected forwarding marker left behind"),
        }
        assert!(descriptor.is_done());

        unsafe {
            drop(Box::from_raw(descriptor.prev() as *const _ as *mut Backing<i32>));
            drop(Box::from_raw(descriptor.next() as *const _ as *mut Backing<i32>));
        }
    }

    #[test]
    fn concurrent_same_direction_help_is_idempotent() {
        let descriptor = make_descriptor(4, 4);
        let guard = pin();
        descriptor
            .prev()
            .cell(0)
            .store_release(Slot::Value(7), &guard);

        run_worker(&descriptor, Side::Left);
        run_worker(&descriptor, Side::Left);

        let guard = pin();
        match unsafe { descriptor.next().cell(0).load_acquire(&guard).as_ref() } {
            Some(Slot::Value(v)) => assert_eq!(*v, 7),
            _ => panic!("expected value preserved across repeat pass"),
        }

        unsafe {
            drop(Box::from_raw(descriptor.prev() as *const _ as *mut Backing<i32>));
            drop(Box::from_raw(descriptor.next() as *const _ as *mut Backing<i32>));
        }
    }
}
