use crate::atomic::Slot;
use crate::descriptor::{Backing, TransferDescriptor};
use crate::error::{BadArgument, Error, Result};
use crate::transfer::{self, resolve_slot, run_worker, Resolved};
use crossbeam_epoch::pin;
use std::fmt;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// A concurrently resizable array of `T`, backed by a forwarding-marker
/// transfer protocol (§4.4-4.5) so readers and writers never block behind
/// a resize.
///
/// `current` is a raw pointer rather than `crossbeam_epoch::Atomic` because
/// a `Backing<T>` already owns epoch-managed cells internally; layering a
/// second reclamation scheme around the whole array would mix ownership
/// models for no benefit. Old generations are retired with the container's
/// own epoch guard at the point they're unlinked, mirroring the teacher's
/// `AtomicAddress<T>` raw-pointer-plus-documented-safety convention.
pub struct ConcurrentArray<T> {
    current: AtomicPtr<Backing<T>>,
}

impl<T: Clone> ConcurrentArray<T> {
    pub fn new(len: usize) -> Self {
        let backing = Box::into_raw(Box::new(Backing::with_len(len)));
        Self {
            current: AtomicPtr::new(backing),
        }
    }

    // safety: `current` is always set by `new` or a successful resize swap,
    // and the pointed-to `Backing` is kept alive until superseded.
    fn load_current(&self) -> &Backing<T> {
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    pub fn size(&self) -> usize {
        self.load_current().len()
    }

    fn check_index(&self, index: usize, len: usize) -> Result<()> {
        if index >= len {
            return Err(Error::BadArgument(BadArgument::IndexOutOfBounds { index, len }));
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<Option<T>> {
        let backing = self.load_current();
        self.check_index(index, backing.len())?;
        let guard = pin();
        Ok(match resolve_slot(backing, index, &guard) {
            Resolved::Empty => None,
            Resolved::Value(v) => Some(v),
        })
    }

    /// Installs `value` at `index`, helping any in-flight resize land
    /// before retrying so the write lands in whichever generation is
    /// current once it succeeds. Returns the previous value.
    pub fn set(&self, index: usize, value: T) -> Result<Option<T>> {
        let guard = pin();
        loop {
            let backing = self.load_current();
            self.check_index(index, backing.len())?;
            let cell = backing.cell(index);
            let current = cell.load_acquire(&guard);
            match unsafe { current.as_ref() } {
                Some(Slot::Fwd(marker)) => {
                    // A resize is forwarding this slot. Liveness must not
                    // depend on the original resizer thread surviving, so
                    // drive its transfer to completion ourselves before
                    // retrying against whatever `current` becomes.
                    transfer::help(&marker.descriptor);
                }
                Some(Slot::Empty) | None => {
                    if cell.cas(current, Slot::Value(value.clone()), &guard).is_ok() {
                        return Ok(None);
                    }
                }
                Some(Slot::Value(old)) => {
                    let old = old.clone();
                    if cell.cas(current, Slot::Value(value.clone()), &guard).is_ok() {
                        return Ok(Some(old));
                    }
                }
            }
        }
    }

    fn compare_exchange_inner(&self, index: usize, expected: Option<&T>, new: Option<T>) -> Result<bool>
    where
        T: PartialEq,
    {
        let guard = pin();
        loop {
            let backing = self.load_current();
            self.check_index(index, backing.len())?;
            let cell = backing.cell(index);
            let current = cell.load_acquire(&guard);
            let matches = match (unsafe { current.as_ref() }, expected) {
                (Some(Slot::Fwd(marker)), _) => {
                    transfer::help(&marker.descriptor);
                    continue;
                }
                (None, None) | (Some(Slot::Empty), None) => true,
                (Some(Slot::Value(v)), Some(e)) => v == e,
                _ => false,
            };
            if !matches {
                return Ok(false);
            }
            let new_slot = match new.clone() {
                Some(v) => Slot::Value(v),
                None => Slot::Empty,
            };
            if cell.cas(current, new_slot, &guard).is_ok() {
                return Ok(true);
            }
        }
    }

    /// Compare-and-set: installs `new` at `index` only if the current value
    /// equals `expected`.
    pub fn cas(&self, index: usize, expected: &T, new: T) -> Result<bool>
    where
        T: PartialEq,
    {
        self.compare_exchange_inner(index, Some(expected), Some(new))
    }

    /// Compare-and-erase: clears `index` only if the current value equals
    /// `expected`.
    pub fn cae(&self, index: usize, expected: &T) -> Result<bool>
    where
        T: PartialEq,
    {
        self.compare_exchange_inner(index, Some(expected), None)
    }

    /// Grows or shrinks the array to `new_len`, transferring `[0, min(old,
    /// new))` into the new generation via the forwarding-marker protocol.
    /// Safe under concurrent resizers on the same array (see
    /// `resize_region`) and under readers/writers racing a resize.
    pub fn resize(&self, new_len: usize) -> Result<()> {
        let old_len = self.size();
        let transfer_len = old_len.min(new_len);
        self.resize_region(0, 0, new_len, transfer_len)
    }

    /// Resizes to `new_len`, transferring `len` slots starting at
    /// `src_off` in the old generation into `dst_off` in the new one.
    ///
    /// Safe under concurrent resizers racing the same array: if this call
    /// loses the publish race it retires its unpublished generation through
    /// the epoch guard (a straggler that loaded a forwarding marker for it
    /// before the loss may still be chasing into it) and retries against
    /// whichever generation won, rather than erroring out.
    pub fn resize_region(&self, src_off: usize, dst_off: usize, new_len: usize, len: usize) -> Result<()> {
        loop {
            let old_ptr = self.current.load(Ordering::Acquire);
            let old_backing = unsafe { &*old_ptr };
            if src_off + len > old_backing.len() || dst_off + len > new_len {
                return Err(Error::BadArgument(BadArgument::IndexOutOfBounds {
                    index: src_off + len,
                    len: old_backing.len(),
                }));
            }

            let new_backing = Box::into_raw(Box::new(Backing::with_len(new_len)));
            let descriptor = Arc::new(TransferDescriptor::new(old_ptr, new_backing, src_off, dst_off, len));

            run_worker(&descriptor, crate::atomic::Side::Left);

            match self
                .current
                .compare_exchange(old_ptr, new_backing, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let guard = pin();
                    unsafe {
                        guard.defer_unchecked(move || {
                            drop(Box::from_raw(old_ptr));
                        });
                    }
                    return Ok(());
                }
                Err(_) => {
                    // Lost the publish race to a concurrent resizer on this
                    // array. `old_backing` cells may already hold markers
                    // pointing into `new_backing` for straggling readers to
                    // chase, so defer its destruction exactly like a retired
                    // `current` generation rather than freeing it outright,
                    // then retry against whichever generation won.
                    let guard = pin();
                    unsafe {
                        guard.defer_unchecked(move || {
                            drop(Box::from_raw(new_backing));
                        });
                    }
                }
            }
        }
    }
}

impl<T> Drop for ConcurrentArray<T> {
    fn drop(&mut self) {
        let ptr = self.current.load(Ordering::Acquire);
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}

impl<T: Clone + fmt::Display> fmt::Display for ConcurrentArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backing = self.load_current();
        let guard = pin();
        write!(f, "[")?;
        for i in 0..backing.len() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match resolve_slot(backing, i, &guard) {
                Resolved::Empty => write!(f, "_")?,
                Resolved::Value(v) => write!(f, "{}", v)?,
            }
        }
        write!(f, "]")
    }
}

unsafe impl<T: Send> Send for ConcurrentArray<T> {}
unsafe impl<T: Send> Sync for ConcurrentArray<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn get_set_roundtrip() {
        let arr: ConcurrentArray<i32> = ConcurrentArray::new(4);
        assert_eq!(arr.get(0).unwrap(), None);
        assert_eq!(arr.set(0, 10).unwrap(), None);
        assert_eq!(arr.get(0).unwrap(), Some(10));
        assert_eq!(arr.set(0, 20).unwrap(), Some(10));
    }

    #[test]
    fn out_of_bounds_is_bad_argument() {
        let arr: ConcurrentArray<i32> = ConcurrentArray::new(2);
        assert!(matches!(arr.get(5), Err(Error::BadArgument(_))));
        assert!(matches!(arr.set(5, 1), Err(Error::BadArgument(_))));
    }

    #[test]
    fn cas_only_succeeds_on_match() {
        let arr: ConcurrentArray<i32> = ConcurrentArray::new(2);
        arr.set(0, 1).unwrap();
        assert!(!arr.cas(0, &99, 2).unwrap());
        assert!(arr.cas(0, &1, 2).unwrap());
        assert_eq!(arr.get(0).unwrap(), Some(2));
    }

    #[test]
    fn resize_preserves_existing_values() {
        let arr: ConcurrentArray<i32> = ConcurrentArray::new(4);
        for i in 0..4 {
            arr.set(i, i as i32 * 10).unwrap();
        }
        arr.resize(8).unwrap();
        assert_eq!(arr.size(), 8);
        for i in 0..4 {
            assert_eq!(arr.get(i).unwrap(), Some(i as i32 * 10));
        }
        for i in 4..8 {
            assert_eq!(arr.get(i).unwrap(), None);
        }
    }

    /// §8 scenario 3 ("resize under write load"), driven as genuinely
    /// concurrent threads: thread A resizes 8 -> 16 while B and C hammer
    /// `set(i, -1)` at random indices in [0, 8) at the same time.
    #[test]
    fn resize_races_concurrent_writers() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let arr = StdArc::new(ConcurrentArray::<i32>::new(8));
        for i in 0..8 {
            arr.set(i, i as i32).unwrap();
        }

        let resizer_arr = arr.clone();
        let resizer = thread::spawn(move || {
            resizer_arr.resize(16).unwrap();
        });

        let mut writers = Vec::new();
        for seed in 0..2u64 {
            let writer_arr = arr.clone();
            writers.push(thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(seed);
                for _ in 0..200 {
                    let i = rng.gen_range(0, 8);
                    writer_arr.set(i, -1).unwrap();
                }
            }));
        }

        resizer.join().unwrap();
        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(arr.size(), 16);
        for i in 0..8 {
            let v = arr.get(i).unwrap();
            assert!(v == Some(i as i32) || v == Some(-1), "index {} had {:?}", i, v);
        }
        for i in 8..16 {
            assert_eq!(arr.get(i).unwrap(), None);
        }
    }

    /// Two threads both drive `resize_region` on the same array at once;
    /// the loser's generation must be safely reclaimed rather than
    /// use-after-freed by a straggling reader chasing its markers, and
    /// every already-written value must survive into whichever generation
    /// ultimately wins the publish race.
    #[test]
    fn concurrent_resizers_on_same_array_are_safe() {
        let arr = StdArc::new(ConcurrentArray::<i32>::new(4));
        for i in 0..4 {
            arr.set(i, i as i32).unwrap();
        }

        let a = arr.clone();
        let resize_a = thread::spawn(move || a.resize(8).unwrap());
        let b = arr.clone();
        let resize_b = thread::spawn(move || b.resize(8).unwrap());

        resize_a.join().unwrap();
        resize_b.join().unwrap();

        assert_eq!(arr.size(), 8);
        for i in 0..4 {
            assert_eq!(arr.get(i).unwrap(), Some(i as i32));
        }
        for i in 4..8 {
            assert_eq!(arr.get(i).unwrap(), None);
        }
    }

    #[test]
    fn display_shows_holes_and_values() {
        let arr: ConcurrentArray<i32> = ConcurrentArray::new(3);
        arr.set(1, 7).unwrap();
        assert_eq!(format!("{}", arr), "[_, 7, _]");
    }
}
