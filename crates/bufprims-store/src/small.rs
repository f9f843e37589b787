use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::debug;

use crate::store::CowStore;

/// Bytes held without a heap allocation.
///
/// Sized to fit `sockaddr_in6`, the largest fixed-size address record in
/// common use.
pub const INLINE_CAPACITY: usize = 28;

#[derive(Clone, Copy)]
#[repr(C, align(8))]
struct InlineBytes([u8; INLINE_CAPACITY]);

#[derive(Clone)]
enum Storage {
    Inline { bytes: InlineBytes, len: u8 },
    Large { store: CowStore, len: usize },
}

/// A byte buffer that keeps up to [`INLINE_CAPACITY`] bytes inline and spills
/// into a shared [`CowStore`] beyond that.
///
/// Clones are independent values. Inline clones copy the bytes; large clones
/// share the store until one of them is mutated. Once a buffer has spilled to
/// the heap it stays there, even if its length later shrinks.
#[derive(Clone)]
pub struct SmallBuffer {
    storage: Storage,
}

impl SmallBuffer {
    /// An empty inline buffer.
    pub const fn new() -> Self {
        Self {
            storage: Storage::Inline {
                bytes: InlineBytes([0; INLINE_CAPACITY]),
                len: 0,
            },
        }
    }

    /// An empty, zero-filled buffer able to hold `minimum_capacity` bytes.
    pub fn with_capacity(minimum_capacity: usize) -> Self {
        if minimum_capacity <= INLINE_CAPACITY {
            Self::new()
        } else {
            Self {
                storage: Storage::Large {
                    store: CowStore::with_capacity(minimum_capacity),
                    len: 0,
                },
            }
        }
    }

    /// Build a buffer by letting `init` fill a region of exactly `capacity`
    /// bytes and report how many of them it used.
    ///
    /// # Panics
    ///
    /// Panics if `init` reports more than `capacity` bytes.
    pub fn with_uninitialized_capacity(
        capacity: usize,
        init: impl FnOnce(&mut [u8]) -> usize,
    ) -> Self {
        match Self::try_with_uninitialized_capacity(capacity, |region| {
            Ok::<_, Infallible>(init(region))
        }) {
            Ok(buffer) => buffer,
            Err(never) => match never {},
        }
    }

    /// Fallible form of [`with_uninitialized_capacity`](Self::with_uninitialized_capacity).
    ///
    /// Errors from `init` are returned unchanged and the partially written
    /// buffer is dropped.
    pub fn try_with_uninitialized_capacity<E>(
        capacity: usize,
        init: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<Self, E> {
        let mut buffer = Self::with_capacity(capacity);
        let used = init(buffer.region_mut(capacity))?;
        assert!(
            used <= capacity,
            "initializer reported {used} bytes for a region of {capacity}"
        );
        buffer.set_len(used);
        Ok(buffer)
    }

    /// A buffer holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::with_uninitialized_capacity(bytes.len(), |region| {
            region.copy_from_slice(bytes);
            bytes.len()
        })
    }

    /// Number of bytes in use.
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Inline { len, .. } => usize::from(*len),
            Storage::Large { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes available without reallocating.
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Inline { .. } => INLINE_CAPACITY,
            Storage::Large { store, .. } => store.capacity(),
        }
    }

    /// Whether the bytes are stored inline.
    pub fn is_inline(&self) -> bool {
        matches!(self.storage, Storage::Inline { .. })
    }

    /// Make room for at least `minimum_capacity` bytes, moving inline bytes
    /// to the heap if they no longer fit. Never moves heap bytes back inline.
    pub fn reserve(&mut self, minimum_capacity: usize) {
        match &mut self.storage {
            Storage::Inline { bytes, len } => {
                if minimum_capacity <= INLINE_CAPACITY {
                    return;
                }
                let len = usize::from(*len);
                let mut store = CowStore::with_capacity(minimum_capacity);
                store.as_mut_bytes()[..len].copy_from_slice(&bytes.0[..len]);
                debug!(len, capacity = store.capacity(), "promoting inline buffer to heap");
                self.storage = Storage::Large { store, len };
            }
            Storage::Large { store, .. } => store.reserve(minimum_capacity),
        }
    }

    /// Set the number of bytes in use, e.g. after the kernel reported how
    /// much of the region it filled.
    ///
    /// Growing the length exposes whatever the region held before; the
    /// region is always initialized memory.
    ///
    /// # Panics
    ///
    /// Panics if `new_len` exceeds [`capacity`](Self::capacity).
    pub fn set_len(&mut self, new_len: usize) {
        assert!(
            new_len <= self.capacity(),
            "length {new_len} exceeds buffer capacity {}",
            self.capacity()
        );
        match &mut self.storage {
            Storage::Inline { len, .. } => *len = new_len as u8,
            Storage::Large { len, .. } => *len = new_len,
        }
    }

    /// Drop all bytes, keeping the current storage.
    pub fn clear(&mut self) {
        self.set_len(0);
    }

    /// Append `bytes`, growing as needed.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let start = self.len();
        let end = start
            .checked_add(bytes.len())
            .expect("buffer length overflow");
        self.reserve(end);
        self.region_mut(end)[start..].copy_from_slice(bytes);
        self.set_len(end);
    }

    /// The bytes in use.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Inline { bytes, len } => &bytes.0[..usize::from(*len)],
            Storage::Large { store, len } => &store.as_bytes()[..*len],
        }
    }

    /// The bytes in use, mutably. A shared heap store is copied first.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        let len = self.len();
        self.region_mut(len)
    }

    /// Run `body` over the bytes in use.
    pub fn with_bytes<R>(&self, body: impl FnOnce(&[u8]) -> R) -> R {
        body(self.as_bytes())
    }

    /// Run `body` over the bytes in use, mutably. A shared heap store is
    /// copied first.
    pub fn with_mut_bytes<R>(&mut self, body: impl FnOnce(&mut [u8]) -> R) -> R {
        body(self.as_mut_bytes())
    }

    /// The whole capacity, writable, regardless of the current length.
    ///
    /// This is the region handed to the kernel when it reports the length
    /// afterwards; pair it with [`set_len`](Self::set_len). A shared heap
    /// store is copied first.
    pub fn as_mut_capacity(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Inline { bytes, .. } => &mut bytes.0,
            Storage::Large { store, .. } => store.as_mut_bytes(),
        }
    }

    fn region_mut(&mut self, len: usize) -> &mut [u8] {
        &mut self.as_mut_capacity()[..len]
    }
}

impl Default for SmallBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&[u8]> for SmallBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::from_slice(bytes)
    }
}

impl PartialEq for SmallBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SmallBuffer {}

impl Hash for SmallBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for SmallBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmallBuffer")
            .field("inline", &self.is_inline())
            .field("len", &self.len())
            .field("bytes", &self.as_bytes())
            .finish()
    }
}
