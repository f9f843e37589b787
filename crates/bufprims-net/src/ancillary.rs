//! Control-message (ancillary data) buffers.
//!
//! Records use the platform `cmsghdr` layout exactly, so the committed bytes
//! can be handed to `sendmsg` as `msg_control` and a `recvmsg` result can be
//! read back in place:
//!
//! ```text
//! ┌───────────────────────────┬─────────┬──────────────────┬─────────┐
//! │ cmsghdr (len/level/type)  │ pad     │ payload          │ pad     │
//! │ HEADER_SIZE bytes         │ to ALIGN│ cmsg_len - DATA  │ to ALIGN│
//! └───────────────────────────┴─────────┴──────────────────┴─────────┘
//! ```
//!
//! Iteration trusts nothing in the headers. A record whose length is below
//! the header size or runs past the committed bytes ends the walk.

use std::fmt;
use std::mem;
use std::os::fd::RawFd;
use std::slice::ChunksExact;

use bufprims_store::CowStore;
use bytes::Bytes;
use tracing::debug;

/// Size of the native `cmsghdr`.
pub const HEADER_SIZE: usize = mem::size_of::<libc::cmsghdr>();

/// Record alignment (`CMSG_ALIGN`).
#[cfg(target_vendor = "apple")]
const ALIGN: usize = mem::size_of::<u32>();
#[cfg(not(target_vendor = "apple"))]
const ALIGN: usize = mem::size_of::<usize>();

/// Offset of the payload from the start of a record (`CMSG_DATA`).
const DATA_OFFSET: usize = align(HEADER_SIZE);

const fn align(len: usize) -> usize {
    (len + ALIGN - 1) & !(ALIGN - 1)
}

/// Bytes a record with `payload_len` bytes of payload occupies, padding
/// included (`CMSG_SPACE`).
pub const fn space(payload_len: usize) -> usize {
    DATA_OFFSET + align(payload_len)
}

/// Value stored in `cmsg_len` for `payload_len` bytes of payload
/// (`CMSG_LEN`).
pub const fn message_len(payload_len: usize) -> usize {
    DATA_OFFSET + payload_len
}

/// A position in an [`AncillaryBuffer`]: the byte offset of a record.
///
/// Indices stay valid until the buffer is next mutated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageIndex(usize);

impl MessageIndex {
    /// The byte offset of the record.
    pub fn offset(self) -> usize {
        self.0
    }
}

/// An append-only buffer of control messages.
///
/// Outbound, messages are added with [`append_message`](Self::append_message)
/// and the committed bytes passed to `sendmsg`. Inbound, the whole buffer is
/// overwritten by one receive (see [`overwrite_with`](Self::overwrite_with))
/// and read through [`messages`](Self::messages).
///
/// Clones share storage until one of them is mutated.
#[derive(Clone, Default)]
pub struct AncillaryBuffer {
    store: Option<CowStore>,
    len: usize,
}

impl AncillaryBuffer {
    /// An empty buffer without an allocation.
    pub const fn new() -> Self {
        Self {
            store: None,
            len: 0,
        }
    }

    /// An empty buffer with room for at least `minimum_capacity` bytes.
    pub fn with_capacity(minimum_capacity: usize) -> Self {
        let mut buffer = Self::new();
        buffer.reserve(minimum_capacity);
        buffer
    }

    /// A buffer whose committed bytes are a copy of `bytes`, e.g. control
    /// data received elsewhere. Nothing is validated up front.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::new();
        buffer.overwrite_with(bytes.len(), |region| {
            region.copy_from_slice(bytes);
            bytes.len()
        });
        buffer
    }

    /// Committed bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes are committed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.store.as_ref().map_or(0, CowStore::capacity)
    }

    /// Drop all messages in O(1), keeping the allocation.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Make sure this value uniquely owns room for `minimum_capacity` bytes.
    pub fn reserve(&mut self, minimum_capacity: usize) {
        match &mut self.store {
            Some(store) => store.reserve(minimum_capacity),
            None if minimum_capacity > 0 => {
                self.store = Some(CowStore::with_capacity(minimum_capacity));
            }
            None => {}
        }
    }

    /// The committed bytes, as passed to `msg_control`.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.store {
            Some(store) => &store.as_bytes()[..self.len],
            None => &[],
        }
    }

    /// Append a message carrying a copy of `payload`.
    pub fn append_message(&mut self, level: libc::c_int, kind: libc::c_int, payload: &[u8]) {
        self.append_message_with(level, kind, payload.len(), |region| {
            region.copy_from_slice(payload);
            payload.len()
        });
    }

    /// Append a message whose payload is written by `init` into a region of
    /// `capacity` bytes; `init` returns how many it used.
    ///
    /// # Panics
    ///
    /// Panics if `init` reports more than `capacity` bytes, or if the buffer
    /// length would overflow.
    pub fn append_message_with(
        &mut self,
        level: libc::c_int,
        kind: libc::c_int,
        capacity: usize,
        init: impl FnOnce(&mut [u8]) -> usize,
    ) {
        let committed = self.len;
        let reserved = committed
            .checked_add(ALIGN - 1)
            .and_then(|_| capacity.checked_add(DATA_OFFSET + ALIGN))
            .and_then(|_| align(committed).checked_add(space(capacity)))
            .expect("control buffer length overflow");
        let start = align(committed);
        self.reserve(reserved);

        let bytes = self.bytes_mut();
        // Committed bytes from a receive or `from_slice` may end unpadded.
        bytes[committed..start].fill(0);
        let data = start + DATA_OFFSET;
        let used = init(&mut bytes[data..data + capacity]);
        assert!(
            used <= capacity,
            "initializer reported {used} bytes for a region of {capacity}"
        );

        write_header(&mut bytes[start..], level, kind, message_len(used));
        bytes[start + HEADER_SIZE..data].fill(0);
        bytes[data + used..start + space(used)].fill(0);
        self.len = start + space(used);
    }

    /// Append an `SCM_RIGHTS` message passing `fds`.
    pub fn append_fds(&mut self, fds: &[RawFd]) {
        let size = mem::size_of_val(fds);
        self.append_message_with(libc::SOL_SOCKET, libc::SCM_RIGHTS, size, |region| {
            for (slot, fd) in region.chunks_exact_mut(mem::size_of::<RawFd>()).zip(fds) {
                slot.copy_from_slice(&fd.to_ne_bytes());
            }
            size
        });
    }

    /// Replace the contents with data written by `receive` into a region of
    /// `capacity` bytes; `receive` returns how many bytes are valid.
    ///
    /// # Panics
    ///
    /// Panics if `receive` reports more than `capacity` bytes.
    pub fn overwrite_with(&mut self, capacity: usize, receive: impl FnOnce(&mut [u8]) -> usize) {
        let reported = receive(self.prepare_receive(capacity));
        assert!(
            reported <= capacity,
            "receiver reported {reported} bytes for a region of {capacity}"
        );
        self.len = reported;
    }

    /// Position of the first well-formed message, or
    /// [`end_index`](Self::end_index) if there is none.
    pub fn start_index(&self) -> MessageIndex {
        let committed = self.as_bytes();
        if record_at(committed, 0).is_some() {
            MessageIndex(0)
        } else {
            if !committed.is_empty() {
                debug!(len = committed.len(), "first control message malformed");
            }
            self.end_index()
        }
    }

    /// One past the last committed byte.
    pub fn end_index(&self) -> MessageIndex {
        MessageIndex(self.len)
    }

    /// Position of the message after `index`, or
    /// [`end_index`](Self::end_index) if the next record is missing or
    /// malformed.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not refer to a well-formed message.
    pub fn index_after(&self, index: MessageIndex) -> MessageIndex {
        let committed = self.as_bytes();
        let record = expect_record(committed, index);
        MessageIndex(next_offset(committed, index.0, record.len))
    }

    /// The message at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not refer to a well-formed message, for example
    /// an index taken before [`clear`](Self::clear).
    pub fn message_at(&self, index: MessageIndex) -> Message<'_> {
        expect_record(self.as_bytes(), index)
    }

    /// Iterate the well-formed messages in order.
    pub fn messages(&self) -> Messages<'_> {
        let committed = self.as_bytes();
        Messages {
            committed,
            offset: self.start_index().0,
        }
    }

    /// Grow to `capacity`, forget the committed bytes and hand out the whole
    /// region for the kernel to fill.
    pub(crate) fn prepare_receive(&mut self, capacity: usize) -> &mut [u8] {
        self.len = 0;
        self.reserve(capacity);
        &mut self.bytes_mut()[..capacity]
    }

    /// Record the control length the kernel reported, clamped to what was
    /// offered.
    pub(crate) fn commit_received(&mut self, reported: usize, capacity: usize) {
        self.len = reported.min(capacity);
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.store {
            Some(store) => store.as_mut_bytes(),
            None => &mut [],
        }
    }
}

impl<'a> IntoIterator for &'a AncillaryBuffer {
    type Item = Message<'a>;
    type IntoIter = Messages<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages()
    }
}

impl fmt::Debug for AncillaryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AncillaryBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("messages", &self.messages().collect::<Vec<_>>())
            .finish()
    }
}

/// One control message, borrowed from its buffer.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Message<'a> {
    level: libc::c_int,
    kind: libc::c_int,
    len: usize,
    payload: &'a [u8],
}

impl<'a> Message<'a> {
    /// Protocol level (`cmsg_level`), e.g. `SOL_SOCKET`.
    pub fn level(&self) -> libc::c_int {
        self.level
    }

    /// Message type (`cmsg_type`), e.g. `SCM_RIGHTS`.
    pub fn kind(&self) -> libc::c_int {
        self.kind
    }

    /// Payload bytes. Never extends past the committed bytes.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Whether this is an `SCM_RIGHTS` message.
    pub fn is_fds(&self) -> bool {
        self.level == libc::SOL_SOCKET && self.kind == libc::SCM_RIGHTS
    }

    /// The descriptors of an `SCM_RIGHTS` message.
    ///
    /// Received descriptors are owned by the receiver; wrap them in
    /// `OwnedFd` or close them.
    pub fn fds(&self) -> Option<ScmRights<'a>> {
        self.is_fds().then(|| ScmRights {
            chunks: self.payload.chunks_exact(mem::size_of::<RawFd>()),
        })
    }

    /// Copy the message out of the buffer.
    pub fn to_owned(&self) -> OwnedMessage {
        OwnedMessage {
            level: self.level,
            kind: self.kind,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

impl fmt::Debug for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("level", &self.level)
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// A control message detached from any buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    pub level: libc::c_int,
    pub kind: libc::c_int,
    pub payload: Bytes,
}

impl OwnedMessage {
    pub fn new(level: libc::c_int, kind: libc::c_int, payload: impl Into<Bytes>) -> Self {
        Self {
            level,
            kind,
            payload: payload.into(),
        }
    }
}

impl Extend<OwnedMessage> for AncillaryBuffer {
    fn extend<I: IntoIterator<Item = OwnedMessage>>(&mut self, iter: I) {
        for message in iter {
            self.append_message(message.level, message.kind, &message.payload);
        }
    }
}

impl FromIterator<OwnedMessage> for AncillaryBuffer {
    fn from_iter<I: IntoIterator<Item = OwnedMessage>>(iter: I) -> Self {
        let mut buffer = Self::new();
        buffer.extend(iter);
        buffer
    }
}

/// File descriptors carried by an `SCM_RIGHTS` message.
#[derive(Debug, Clone)]
pub struct ScmRights<'a> {
    chunks: ChunksExact<'a, u8>,
}

impl Iterator for ScmRights<'_> {
    type Item = RawFd;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;
        let mut raw = [0u8; mem::size_of::<RawFd>()];
        raw.copy_from_slice(chunk);
        Some(RawFd::from_ne_bytes(raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for ScmRights<'_> {}

/// Iterator over the well-formed messages of an [`AncillaryBuffer`].
#[derive(Debug, Clone)]
pub struct Messages<'a> {
    committed: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Messages<'a> {
    type Item = Message<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let message = record_at(self.committed, self.offset)?;
        self.offset = next_offset(self.committed, self.offset, message.len);
        Some(message)
    }
}

impl std::iter::FusedIterator for Messages<'_> {}

/// Parse the record at `offset`, or `None` if it is not fully inside
/// `committed` or declares a length shorter than its own header.
fn record_at(committed: &[u8], offset: usize) -> Option<Message<'_>> {
    let header_end = offset.checked_add(HEADER_SIZE)?;
    if header_end > committed.len() {
        return None;
    }
    // SAFETY: `offset..offset + HEADER_SIZE` is in bounds and `cmsghdr` is
    // plain integers, valid for any bit pattern. The read tolerates any
    // alignment.
    let header: libc::cmsghdr =
        unsafe { std::ptr::read_unaligned(committed[offset..].as_ptr().cast()) };

    let len = header.cmsg_len as usize;
    if len < DATA_OFFSET {
        return None;
    }
    let end = offset.checked_add(len)?;
    if end > committed.len() {
        return None;
    }
    Some(Message {
        level: header.cmsg_level,
        kind: header.cmsg_type,
        len,
        payload: &committed[offset + DATA_OFFSET..end],
    })
}

/// Offset of the record following the one at `offset`, or the end of
/// `committed` if that record is missing or malformed.
fn next_offset(committed: &[u8], offset: usize, len: usize) -> usize {
    let end = committed.len();
    let next = offset.saturating_add(align(len)).min(end);
    if next < end && record_at(committed, next).is_none() {
        debug!(offset = next, committed = end, "malformed control message; stopping");
        return end;
    }
    next
}

fn expect_record(committed: &[u8], index: MessageIndex) -> Message<'_> {
    match record_at(committed, index.0) {
        Some(message) => message,
        None => panic!(
            "index {} does not refer to a well-formed control message",
            index.0
        ),
    }
}

fn write_header(bytes: &mut [u8], level: libc::c_int, kind: libc::c_int, len: usize) {
    // SAFETY: `cmsghdr` is plain integers (plus padding on some targets);
    // all-zero is a valid value.
    let mut header: libc::cmsghdr = unsafe { mem::zeroed() };
    header.cmsg_len = len as _;
    header.cmsg_level = level;
    header.cmsg_type = kind;
    assert!(bytes.len() >= HEADER_SIZE);
    // SAFETY: `bytes` has room for a full header; the write tolerates any
    // alignment.
    unsafe { std::ptr::write_unaligned(bytes.as_mut_ptr().cast::<libc::cmsghdr>(), header) };
}
