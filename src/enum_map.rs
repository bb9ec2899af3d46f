use crate::atomic::{Cell, Slot};
use crate::counter::Counter;
use crate::error::{Error, Result};
use crossbeam_epoch::{pin, Guard};
use std::marker::PhantomData;

/// A finite, enumerable key domain. The domain replaces the spec's runtime
/// "foreign enum class" bad-argument check: a key that type-checks as `K`
/// is, by construction, inside `K::DOMAIN`, so there is no runtime
/// equivalent to reject — see `extend_from` for the one place a caller can
/// still hand over keys from the wrong domain (a different `K`).
pub trait EnumKey: Copy + Eq + 'static {
    const DOMAIN: &'static [Self];

    fn ordinal(&self) -> usize;
}

/// A concurrent map over a fixed enum key domain (§4.3), array-backed by
/// ordinal so every operation is an O(1) indexed cell access rather than a
/// hash lookup.
pub struct EnumMap<K: EnumKey, V> {
    slots: Vec<Cell<V>>,
    count: Counter,
    _key: PhantomData<K>,
}

impl<K: EnumKey, V> EnumMap<K, V> {
    pub fn new() -> Self {
        debug_assert!(!K::DOMAIN.is_empty(), "EnumKey::DOMAIN must be non-empty");
        #[cfg(debug_assertions)]
        {
            let mut seen = vec![false; K::DOMAIN.len()];
            for key in K::DOMAIN {
                let ord = key.ordinal();
                debug_assert!(ord < K::DOMAIN.len(), "EnumKey::ordinal out of range of DOMAIN");
                debug_assert!(!seen[ord], "EnumKey::ordinal must be a 0..N permutation (duplicate ordinal {})", ord);
                seen[ord] = true;
            }
        }

        let mut slots = Vec::with_capacity(K::DOMAIN.len());
        slots.resize_with(K::DOMAIN.len(), Cell::empty);
        Self {
            slots,
            count: Counter::new(),
            _key: PhantomData,
        }
    }

    fn ordinal(&self, key: &K) -> usize {
        let ord = key.ordinal();
        debug_assert!(ord < self.slots.len(), "EnumKey::ordinal out of range of DOMAIN");
        ord
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let guard = pin();
        let cell = &self.slots[self.ordinal(key)];
        match unsafe { cell.load_acquire(&guard).as_ref() } {
            Some(Slot::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let guard = pin();
        let cell = &self.slots[self.ordinal(key)];
        matches!(unsafe { cell.load_acquire(&guard).as_ref() }, Some(Slot::Value(_)))
    }

    /// Installs `value` at `key`, returning whatever was previously mapped.
    pub fn put(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        let cell = &self.slots[self.ordinal(&key)];
        let guard = pin();
        let prev = cell.exchange(Slot::Value(value), &guard);
        match unsafe { prev.as_ref() } {
            Some(Slot::Value(v)) => {
                let v = v.clone();
                unsafe { guard.defer_destroy(prev) };
                Some(v)
            }
            _ => {
                unsafe { guard.defer_destroy(prev) };
                self.count.add(1);
                None
            }
        }
    }

    /// Removes and returns the mapping for `key`, if any.
    pub fn remove(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let guard = pin();
        self.remove_at(self.ordinal(key), &guard)
    }

    fn remove_at(&self, ordinal: usize, guard: &Guard) -> Option<V>
    where
        V: Clone,
    {
        let cell = &self.slots[ordinal];
        let prev = cell.exchange(Slot::Empty, guard);
        match unsafe { prev.as_ref() } {
            Some(Slot::Value(v)) => {
                let v = v.clone();
                unsafe { guard.defer_destroy(prev) };
                self.count.add(-1);
                Some(v)
            }
            _ => {
                unsafe { guard.defer_destroy(prev) };
                None
            }
        }
    }

    /// Removes the mapping for `key` only if it currently equals `value`
    /// (the spec's two-argument `remove`).
    pub fn remove_if(&self, key: &K, value: &V) -> bool
    where
        V: PartialEq + Clone,
    {
        let guard = pin();
        let cell = &self.slots[self.ordinal(key)];
        loop {
            let current = cell.load_acquire(&guard);
            match unsafe { current.as_ref() } {
                Some(Slot::Value(v)) if v == value => {
                    if cell.cas(current, Slot::Empty, &guard).is_ok() {
                        self.count.add(-1);
                        return true;
                    }
                }
                _ => return false,
            }
        }
    }

    /// Replaces the mapping for `key` only if it currently equals
    /// `expected`.
    pub fn replace(&self, key: &K, expected: &V, new: V) -> bool
    where
        V: PartialEq + Clone,
    {
        let guard = pin();
        let cell = &self.slots[self.ordinal(key)];
        loop {
            let current = cell.load_acquire(&guard);
            match unsafe { current.as_ref() } {
                Some(Slot::Value(v)) if v == expected => {
                    if cell.cas(current, Slot::Value(new.clone()), &guard).is_ok() {
                        return true;
                    }
                }
                _ => return false,
            }
        }
    }

    /// Installs `value` at `key` only if it is currently unmapped.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        let guard = pin();
        let cell = &self.slots[self.ordinal(&key)];
        loop {
            let current = cell.load_acquire(&guard);
            match unsafe { current.as_ref() } {
                Some(Slot::Value(v)) => return Some(v.clone()),
                _ => {
                    if cell.cas(current, Slot::Value(value.clone()), &guard).is_ok() {
                        self.count.add(1);
                        return None;
                    }
                }
            }
        }
    }

    /// Atomically recomputes the mapping for `key`. `f` may be invoked more
    /// than once under contention but exactly once for the value that is
    /// ultimately committed (§8 scenario 5's mutual-exclusion guarantee).
    pub fn compute(&self, key: K, mut f: impl FnMut(Option<V>) -> Option<V>) -> Option<V>
    where
        V: Clone,
    {
        let guard = pin();
        let cell = &self.slots[self.ordinal(&key)];
        loop {
            let current = cell.load_acquire(&guard);
            let existing = match unsafe { current.as_ref() } {
                Some(Slot::Value(v)) => Some(v.clone()),
                _ => None,
            };
            let had_existing = existing.is_some();
            let next = f(existing);
            let new_slot = match next.clone() {
                Some(v) => Slot::Value(v),
                None => Slot::Empty,
            };
            if cell.cas(current, new_slot, &guard).is_ok() {
                match (had_existing, next.is_some()) {
                    (false, true) => self.count.add(1),
                    (true, false) => self.count.add(-1),
                    _ => {}
                }
                return next;
            }
        }
    }

    /// `compute` restricted to run only when `key` is currently unmapped.
    pub fn compute_if_absent(&self, key: K, mut f: impl FnMut() -> V) -> V
    where
        V: Clone,
    {
        let guard = pin();
        let cell = &self.slots[self.ordinal(&key)];
        loop {
            let current = cell.load_acquire(&guard);
            if let Some(Slot::Value(v)) = unsafe { current.as_ref() } {
                return v.clone();
            }
            let value = f();
            if cell.cas(current, Slot::Value(value.clone()), &guard).is_ok() {
                self.count.add(1);
                return value;
            }
        }
    }

    /// `compute` restricted to run only when `key` is currently mapped.
    pub fn compute_if_present(&self, key: K, mut f: impl FnMut(V) -> Option<V>) -> Option<V>
    where
        V: Clone,
    {
        let guard = pin();
        let cell = &self.slots[self.ordinal(&key)];
        loop {
            let current = cell.load_acquire(&guard);
            let existing = match unsafe { current.as_ref() } {
                Some(Slot::Value(v)) => v.clone(),
                _ => return None,
            };
            let next = f(existing);
            let new_slot = match next.clone() {
                Some(v) => Slot::Value(v),
                None => Slot::Empty,
            };
            if cell.cas(current, new_slot, &guard).is_ok() {
                if next.is_none() {
                    self.count.add(-1);
                }
                return next;
            }
        }
    }

    /// Combines `value` with any existing mapping via `f`, or installs
    /// `value` outright if `key` is unmapped. Removes the mapping if `f`
    /// returns `None`.
    pub fn merge(&self, key: K, value: V, mut f: impl FnMut(V, V) -> Option<V>) -> Option<V>
    where
        V: Clone,
    {
        let guard = pin();
        let cell = &self.slots[self.ordinal(&key)];
        loop {
            let current = cell.load_acquire(&guard);
            let existing = match unsafe { current.as_ref() } {
                Some(Slot::Value(v)) => Some(v.clone()),
                _ => None,
            };
            let had_existing = existing.is_some();
            let next = match existing {
                Some(old) => f(old, value.clone()),
                None => Some(value.clone()),
            };
            let new_slot = match next.clone() {
                Some(v) => Slot::Value(v),
                None => Slot::Empty,
            };
            if cell.cas(current, new_slot, &guard).is_ok() {
                match (had_existing, next.is_some()) {
                    (false, true) => self.count.add(1),
                    (true, false) => self.count.add(-1),
                    _ => {}
                }
                return next;
            }
        }
    }

    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        let guard = pin();
        self.slots.iter().any(|cell| {
            matches!(unsafe { cell.load_acquire(&guard).as_ref() }, Some(Slot::Value(v)) if v == value)
        })
    }

    /// Weakly-consistent merge of another map's entries into this one
    /// (the `putAll` analogue, §4.3.1). `other` must share this map's `K`,
    /// so there is no runtime "foreign domain" case to reject.
    pub fn extend_from(&self, other: &EnumMap<K, V>)
    where
        V: Clone,
    {
        for key in K::DOMAIN {
            if let Some(v) = other.get(key) {
                self.put(*key, v);
            }
        }
    }

    pub fn clear(&self) {
        let guard = pin();
        for i in 0..self.slots.len() {
            self.remove_at(i, &guard);
        }
    }

    pub fn size(&self) -> i32 {
        self.count.size()
    }

    pub fn is_empty(&self) -> bool {
        self.count.sum() <= 0
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { map: self, next: 0 }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { map: self, next: 0 }
    }

    pub fn entries(&self) -> Entries<'_, K, V> {
        Entries { map: self, next: 0, last: None }
    }
}

impl<K: EnumKey, V> Default for EnumMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EnumKey, V: PartialEq + Clone> PartialEq for EnumMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        for key in K::DOMAIN {
            if self.get(key) != other.get(key) {
                return false;
            }
        }
        true
    }
}

impl<K: EnumKey, V: PartialEq + Clone> Eq for EnumMap<K, V> {}

/// Weakly consistent: reflects some, but not necessarily all, of the
/// modifications interleaved with the scan. Never snapshots and never
/// raises a concurrent-modification error (§9 re-architecture decision —
/// Rust iterators just borrow the map rather than modeling a cached view).
pub struct Keys<'a, K: EnumKey, V> {
    map: &'a EnumMap<K, V>,
    next: usize,
}

impl<'a, K: EnumKey, V> Iterator for Keys<'a, K, V> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        let guard = pin();
        while self.next < self.map.slots.len() {
            let idx = self.next;
            self.next += 1;
            if matches!(
                unsafe { self.map.slots[idx].load_acquire(&guard).as_ref() },
                Some(Slot::Value(_))
            ) {
                return Some(K::DOMAIN[idx]);
            }
        }
        None
    }
}

pub struct Values<'a, K: EnumKey, V> {
    map: &'a EnumMap<K, V>,
    next: usize,
}

impl<'a, K: EnumKey, V: Clone> Iterator for Values<'a, K, V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let guard = pin();
        while self.next < self.map.slots.len() {
            let idx = self.next;
            self.next += 1;
            if let Some(Slot::Value(v)) = unsafe { self.map.slots[idx].load_acquire(&guard).as_ref() } {
                return Some(v.clone());
            }
        }
        None
    }
}

pub struct Entries<'a, K: EnumKey, V> {
    map: &'a EnumMap<K, V>,
    next: usize,
    last: Option<(usize, V)>,
}

impl<'a, K: EnumKey, V: Clone> Iterator for Entries<'a, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let guard = pin();
        while self.next < self.map.slots.len() {
            let idx = self.next;
            self.next += 1;
            if let Some(Slot::Value(v)) = unsafe { self.map.slots[idx].load_acquire(&guard).as_ref() } {
                let value = v.clone();
                self.last = Some((idx, value.clone()));
                return Some((K::DOMAIN[idx], value));
            }
        }
        None
    }
}

impl<'a, K: EnumKey, V: Clone> Entries<'a, K, V> {
    /// Removes the entry most recently yielded by `next()`. Fails with
    /// `Error::IteratorExhausted` if called before any `next()` call or
    /// again after a successful `remove()`.
    pub fn remove(&mut self) -> Result<V> {
        let (idx, cached) = self.last.take().ok_or(Error::IteratorExhausted)?;
        let guard = pin();
        Ok(self.map.remove_at(idx, &guard).unwrap_or(cached))
    }
}
