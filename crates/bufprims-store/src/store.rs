use std::fmt;
use std::iter;
use std::sync::Arc;

use tracing::trace;

/// Storage word. Backing the region with `u64` keeps it 8-byte aligned, which
/// is what the kernel expects of `msghdr.msg_control` and `sockaddr` records.
type Word = u64;

const WORD_SIZE: usize = std::mem::size_of::<Word>();

/// Growth factor numerator (growth factor is 7/4 = 1.75).
pub const GROWTH_NUMERATOR: usize = 7;
/// Growth factor denominator.
pub const GROWTH_DENOMINATOR: usize = 4;

/// Capacity chosen when a store of `current` bytes must hold `requested`.
///
/// Returns `max(round(1.75 × current), requested)`. Panics on overflow.
pub fn grown_capacity(current: usize, requested: usize) -> usize {
    let scaled = current
        .checked_mul(GROWTH_NUMERATOR)
        .and_then(|n| n.checked_add(GROWTH_DENOMINATOR / 2))
        .expect("capacity overflow while growing buffer");
    (scaled / GROWTH_DENOMINATOR).max(requested)
}

/// A reference-counted, fixed-capacity byte region with copy-on-write
/// semantics.
///
/// Cloning a `CowStore` is cheap: both values share one allocation until
/// either of them asks for mutable access, at which point the mutating side
/// takes a private copy of the full capacity. The store never tracks a
/// logical length; that belongs to the owning value.
#[derive(Clone)]
pub struct CowStore {
    words: Arc<[Word]>,
}

impl CowStore {
    /// Allocate a zero-filled store holding at least `minimum_capacity` bytes.
    ///
    /// Capacity is rounded up to a whole number of 8-byte words.
    ///
    /// # Panics
    ///
    /// Panics if `minimum_capacity` is zero.
    pub fn with_capacity(minimum_capacity: usize) -> Self {
        assert!(
            minimum_capacity > 0,
            "CowStore requires a positive minimum capacity"
        );
        Self {
            words: zeroed_words(minimum_capacity),
        }
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_SIZE
    }

    /// Whether this value is the only owner of its allocation.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.words) == 1
    }

    /// Whether `self` and `other` currently share one allocation.
    pub fn shares_allocation_with(&self, other: &CowStore) -> bool {
        Arc::ptr_eq(&self.words, &other.words)
    }

    /// Make sure this value exclusively owns its allocation, copying all
    /// `capacity()` bytes into a fresh one if it is shared.
    pub fn make_unique(&mut self) {
        if Arc::get_mut(&mut self.words).is_none() {
            trace!(capacity = self.capacity(), "copying shared store");
            self.words = Arc::from(&self.words[..]);
        }
    }

    /// Make sure this value exclusively owns an allocation of at least
    /// `minimum_capacity` bytes.
    ///
    /// Growth picks [`grown_capacity`], so repeated small reservations cost
    /// amortized O(1). The first `capacity()` bytes are preserved. A shared
    /// store that also needs to grow is copied exactly once.
    pub fn reserve(&mut self, minimum_capacity: usize) {
        let current = self.capacity();
        if minimum_capacity <= current {
            self.make_unique();
            return;
        }

        let new_capacity = grown_capacity(current, minimum_capacity);
        let extra_words = new_capacity.div_ceil(WORD_SIZE) - self.words.len();
        trace!(old = current, new = new_capacity, "growing store");
        self.words = self
            .words
            .iter()
            .copied()
            .chain(iter::repeat_n(0, extra_words))
            .collect();
    }

    /// Read-only view of the whole region.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the region is `words.len()` initialized `u64`s; every byte of
        // it is a valid `u8` and `u8` has no alignment requirement.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.capacity()) }
    }

    /// Mutable view of the whole region, copying first if shared.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        let words = self.unique_words();
        let len = words.len() * WORD_SIZE;
        // SAFETY: as in `as_bytes`; the borrow is unique because `words` is.
        unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), len) }
    }

    /// Run `body` with read access to the whole region.
    pub fn with_bytes<R>(&self, body: impl FnOnce(&[u8]) -> R) -> R {
        body(self.as_bytes())
    }

    /// Run `body` with write access to the whole region, copying first if
    /// shared.
    pub fn with_mut_bytes<R>(&mut self, body: impl FnOnce(&mut [u8]) -> R) -> R {
        body(self.as_mut_bytes())
    }

    fn unique_words(&mut self) -> &mut [Word] {
        self.make_unique();
        match Arc::get_mut(&mut self.words) {
            Some(words) => words,
            None => unreachable!("store is uniquely owned after make_unique"),
        }
    }
}

impl fmt::Debug for CowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CowStore")
            .field("capacity", &self.capacity())
            .field("owners", &Arc::strong_count(&self.words))
            .finish()
    }
}

fn zeroed_words(minimum_capacity: usize) -> Arc<[Word]> {
    iter::repeat_n(0, minimum_capacity.div_ceil(WORD_SIZE)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_up_to_words() {
        assert_eq!(CowStore::with_capacity(1).capacity(), 8);
        assert_eq!(CowStore::with_capacity(8).capacity(), 8);
        assert_eq!(CowStore::with_capacity(9).capacity(), 16);
    }

    #[test]
    #[should_panic(expected = "positive minimum capacity")]
    fn test_zero_capacity_is_rejected() {
        let _ = CowStore::with_capacity(0);
    }

    #[test]
    fn test_new_store_is_zeroed() {
        let store = CowStore::with_capacity(64);
        assert!(store.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_clone_shares_until_mutation() {
        let mut a = CowStore::with_capacity(16);
        a.as_mut_bytes()[0] = 7;

        let mut b = a.clone();
        assert!(a.shares_allocation_with(&b));
        assert!(!a.is_unique());

        b.as_mut_bytes()[0] = 9;
        assert!(!a.shares_allocation_with(&b));
        assert!(a.is_unique() && b.is_unique());
        assert_eq!(a.as_bytes()[0], 7);
        assert_eq!(b.as_bytes()[0], 9);
    }

    #[test]
    fn test_make_unique_preserves_full_capacity() {
        let mut a = CowStore::with_capacity(24);
        a.as_mut_bytes().copy_from_slice(&[0xAB; 24]);
        let mut b = a.clone();
        b.make_unique();
        assert_eq!(b.capacity(), 24);
        assert_eq!(b.as_bytes(), a.as_bytes());
    }

    #[test]
    fn test_unique_mutation_does_not_reallocate() {
        let mut a = CowStore::with_capacity(16);
        let before = a.as_bytes().as_ptr();
        a.as_mut_bytes()[3] = 1;
        a.reserve(16);
        assert_eq!(a.as_bytes().as_ptr(), before);
    }

    #[test]
    fn test_reserve_grows_by_factor() {
        let mut a = CowStore::with_capacity(64);
        a.reserve(65);
        assert_eq!(a.capacity(), 112);

        let mut b = CowStore::with_capacity(8);
        b.reserve(100);
        assert_eq!(b.capacity(), 104);
    }

    #[test]
    fn test_reserve_preserves_contents() {
        let mut a = CowStore::with_capacity(16);
        a.as_mut_bytes().copy_from_slice(&(0u8..16).collect::<Vec<_>>());
        let shared = a.clone();

        a.reserve(1000);
        assert!(a.capacity() >= 1000);
        assert_eq!(&a.as_bytes()[..16], shared.as_bytes());
        assert!(a.as_bytes()[16..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_grown_capacity_rounds_to_nearest() {
        assert_eq!(grown_capacity(8, 9), 14);
        assert_eq!(grown_capacity(2, 3), 4);
        assert_eq!(grown_capacity(0, 5), 5);
        assert_eq!(grown_capacity(100, 1000), 1000);
    }

    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn test_grown_capacity_overflow_panics() {
        let _ = grown_capacity(usize::MAX, usize::MAX);
    }

    #[test]
    fn test_closure_access_sees_same_bytes() {
        let mut a = CowStore::with_capacity(8);
        a.with_mut_bytes(|bytes| bytes[..3].copy_from_slice(b"abc"));
        let first = a.with_bytes(|bytes| bytes[..3].to_vec());
        assert_eq!(first, b"abc");
    }
}
