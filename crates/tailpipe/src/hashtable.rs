// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Open-addressed hash table with double hashing and bulk updates.
//!
//! The table stores user payloads inline in a power-of-two arena. Both
//! probe offsets are taken from the caller-supplied hash: the low bits
//! form the start position, the next higher bits (forced odd, hence
//! coprime to the table size) form the step, so every probe sequence
//! visits every bucket. The caller's hash is multiplied by the FNV
//! prime once per operation to inject entropy into the high bits, so
//! weak caller hashes (small integers, fds) still probe well.
//!
//! Deleted entries leave tombstones so other probe sequences are not
//! cut short. The table grows at 1/2 load, shrinks at 1/8 load, and
//! rehashes in place when tombstones exceed 1/4 of the capacity. A
//! *bulk update* defers all delete-triggered rehashing until
//! [`HashTable::end_bulk_update`], which then shrinks directly to the
//! smallest fitting power of two; use it for multi-delete sweeps.

use std::hash::Hasher;

use fnv::FnvHasher;

/// FNV-1a offset basis. Start here, then chain `hash_update*` calls.
pub const HASH_INIT: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV prime, also used to premix caller hashes for probing.
const HASH_MULT: u64 = 0x0000_0100_0000_01b3;

/// Fold a single byte into an FNV-1a hash.
#[inline]
pub fn hash_update(h: u64, byte: u8) -> u64 {
    let mut hasher = FnvHasher::with_key(h);
    hasher.write_u8(byte);
    hasher.finish()
}

/// Fold a string into an FNV-1a hash (no terminator included).
#[inline]
pub fn hash_update_str(h: u64, s: &str) -> u64 {
    hash_update_mem(h, s.as_bytes())
}

/// Fold a byte slice into an FNV-1a hash.
#[inline]
pub fn hash_update_mem(h: u64, data: &[u8]) -> u64 {
    let mut hasher = FnvHasher::with_key(h);
    hasher.write(data);
    hasher.finish()
}

enum Slot<T> {
    Empty,
    Used { hash: u64, data: T },
    Tomb,
}

enum Probe {
    /// Index of the matching entry.
    Found(usize),
    /// Index of the slot an insertion for this hash should use.
    Vacant(usize),
}

/// Open-addressed, double-hashed map of inline payloads.
///
/// The table does not know about keys; callers supply a hash and a
/// match predicate, and payloads embed whatever key they need. See
/// [`crate::fdpoll`] and [`crate::value::RateCache`] for the two usage
/// patterns in this crate.
pub struct HashTable<T> {
    slots: Box<[Slot<T>]>,
    size_exp: u32,
    min_exp: u32,
    used: usize,
    tombs: usize,
    bulk: u32,
}

fn alloc_slots<T>(size_exp: u32) -> Box<[Slot<T>]> {
    (0..1usize << size_exp).map(|_| Slot::Empty).collect()
}

impl<T> HashTable<T> {
    /// Create a table with an initial and minimum capacity of
    /// `2^min_exp` buckets. Exponents below 1 are raised to 1 so the
    /// probe-step shift is always defined.
    pub fn new(min_exp: u32) -> Self {
        let min_exp = min_exp.max(1);
        Self {
            slots: alloc_slots(min_exp),
            size_exp: min_exp,
            min_exp,
            used: 0,
            tombs: 0,
            bulk: 0,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Current bucket count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn mask(&self) -> u64 {
        (self.slots.len() - 1) as u64
    }

    #[inline]
    fn premix(hash: u64) -> u64 {
        hash.wrapping_mul(HASH_MULT)
    }

    /// Probe for a premixed hash. `matches` is `None` when the caller
    /// knows the key is absent and only wants a vacant slot; in that
    /// case the first empty *or* tombstone bucket is taken directly.
    fn probe(&self, mixed: u64, mut matches: Option<&mut dyn FnMut(&T) -> bool>) -> Probe {
        let mask = self.mask();
        let mut pos = mixed & mask;
        let h2 = ((mixed >> (self.size_exp - 1)) | 1) & mask;
        let mut first_tomb: Option<usize> = None;

        loop {
            match &self.slots[pos as usize] {
                Slot::Empty => {
                    return Probe::Vacant(first_tomb.unwrap_or(pos as usize));
                }
                Slot::Used { hash, data } => {
                    if let Some(m) = matches.as_deref_mut() {
                        if *hash == mixed && m(data) {
                            return Probe::Found(pos as usize);
                        }
                    }
                }
                Slot::Tomb => {
                    if matches.is_none() {
                        return Probe::Vacant(pos as usize);
                    }
                    if first_tomb.is_none() {
                        first_tomb = Some(pos as usize);
                    }
                }
            }
            pos = (pos + h2) & mask;
        }
    }

    /// Find an entry by hash and predicate.
    pub fn lookup(&self, hash: u64, mut matches: impl FnMut(&T) -> bool) -> Option<&T> {
        match self.probe(Self::premix(hash), Some(&mut matches)) {
            Probe::Found(i) => match &self.slots[i] {
                Slot::Used { data, .. } => Some(data),
                _ => None,
            },
            Probe::Vacant(_) => None,
        }
    }

    /// Find an entry by hash and predicate, for in-place update. The
    /// caller must not change whatever the payload uses as its key.
    pub fn lookup_mut(&mut self, hash: u64, mut matches: impl FnMut(&T) -> bool) -> Option<&mut T> {
        match self.probe(Self::premix(hash), Some(&mut matches)) {
            Probe::Found(i) => match &mut self.slots[i] {
                Slot::Used { data, .. } => Some(data),
                _ => None,
            },
            Probe::Vacant(_) => None,
        }
    }

    /// Insert a payload whose key is known to be absent from the
    /// table. Inserting a duplicate key makes later lookups ambiguous;
    /// check with [`HashTable::lookup`] first when in doubt.
    pub fn insert(&mut self, hash: u64, data: T) {
        let mixed = Self::premix(hash);
        let slot = match self.probe(mixed, None) {
            Probe::Vacant(i) => i,
            // Unreachable with matches == None; keep the index anyway.
            Probe::Found(i) => i,
        };
        if matches!(self.slots[slot], Slot::Tomb) {
            self.tombs -= 1;
        }
        self.slots[slot] = Slot::Used { hash: mixed, data };
        self.used += 1;
        self.check_grow();
    }

    /// Remove an entry, moving the payload out.
    pub fn remove(&mut self, hash: u64, mut matches: impl FnMut(&T) -> bool) -> Option<T> {
        let slot = match self.probe(Self::premix(hash), Some(&mut matches)) {
            Probe::Found(i) => i,
            Probe::Vacant(_) => return None,
        };
        match std::mem::replace(&mut self.slots[slot], Slot::Tomb) {
            Slot::Used { data, .. } => {
                self.used -= 1;
                self.tombs += 1;
                if self.bulk == 0 {
                    self.check_shrink(false);
                }
                Some(data)
            }
            other => {
                // Probe said Found, so this cannot happen; restore.
                self.slots[slot] = other;
                None
            }
        }
    }

    /// Visit every live entry. The callback returns `true` to stop
    /// early; `traverse` then returns `true`.
    pub fn traverse(&self, mut callback: impl FnMut(&T) -> bool) -> bool {
        for slot in self.slots.iter() {
            if let Slot::Used { data, .. } = slot {
                if callback(data) {
                    return true;
                }
            }
        }
        false
    }

    /// Iterator over live entries, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Used { data, .. } => Some(data),
            _ => None,
        })
    }

    /// Keep only entries matching the predicate. Runs as one bulk
    /// update, so the sweep triggers at most a single rehash at the
    /// end regardless of how many entries are dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.start_bulk_update();
        for slot in self.slots.iter_mut() {
            let drop_it = matches!(slot, Slot::Used { data, .. } if !keep(data));
            if drop_it {
                *slot = Slot::Tomb;
                self.used -= 1;
                self.tombs += 1;
            }
        }
        self.end_bulk_update();
    }

    /// Enter bulk-update mode. Nestable; every call must be paired
    /// with [`HashTable::end_bulk_update`]. While in effect, removals
    /// do not trigger any rehash. Insertions may still rehash.
    pub fn start_bulk_update(&mut self) {
        self.bulk += 1;
    }

    /// Leave bulk-update mode. When the outermost bulk update ends,
    /// the table shrinks straight to the smallest power of two holding
    /// four times the live entries (bounded below by the minimum).
    pub fn end_bulk_update(&mut self) {
        debug_assert!(self.bulk > 0);
        self.bulk = self.bulk.saturating_sub(1);
        if self.bulk == 0 {
            self.check_shrink(true);
        }
    }

    fn check_grow(&mut self) {
        if self.used > self.slots.len() / 2 {
            log::debug!(
                "hashtable grow: used={} tombs={} size={}",
                self.used,
                self.tombs,
                self.slots.len()
            );
            self.rehash(self.size_exp + 1);
        }
    }

    fn check_shrink(&mut self, bulk_end: bool) {
        // Shrink only below 1/8 load so the table sits at 1/4 load
        // afterwards; shrinking to 1/2 load would make the very next
        // insert grow it right back.
        if self.used <= self.slots.len() / 8 && self.size_exp > self.min_exp {
            let new_exp = if bulk_end {
                let min_size = (self.used as u64) << 2;
                let mut exp = self.min_exp;
                while (1u64 << exp) < min_size {
                    exp += 1;
                }
                exp
            } else {
                self.size_exp - 1
            };
            log::debug!(
                "hashtable shrink: used={} tombs={} size={} new_exp={}",
                self.used,
                self.tombs,
                self.slots.len(),
                new_exp
            );
            self.rehash(new_exp);
        } else if self.tombs > self.slots.len() / 4 {
            log::debug!(
                "hashtable cleanup: used={} tombs={} size={}",
                self.used,
                self.tombs,
                self.slots.len()
            );
            self.rehash(self.size_exp);
        }
    }

    /// Move every live entry into a fresh arena of `2^new_exp`
    /// buckets, dropping all tombstones.
    fn rehash(&mut self, new_exp: u32) {
        let old = std::mem::replace(&mut self.slots, alloc_slots(new_exp));
        self.size_exp = new_exp;
        self.tombs = 0;

        for slot in old.into_vec() {
            if let Slot::Used { hash, data } = slot {
                let idx = match self.probe(hash, None) {
                    Probe::Vacant(i) => i,
                    Probe::Found(i) => i,
                };
                self.slots[idx] = Slot::Used { hash, data };
            }
        }
    }
}
