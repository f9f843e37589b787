use std::ffi::OsStr;
use std::fmt;
use std::mem::{self, offset_of};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use bufprims_store::SmallBuffer;

use crate::error::AddressError;

/// Offset of the family field in every `sockaddr` record.
const FAMILY_OFFSET: usize = offset_of!(libc::sockaddr, sa_family);
const FAMILY_SIZE: usize = mem::size_of::<libc::sa_family_t>();
const SUN_PATH_OFFSET: usize = offset_of!(libc::sockaddr_un, sun_path);
const SUN_PATH_LEN: usize = mem::size_of::<libc::sockaddr_un>() - SUN_PATH_OFFSET;

/// An address family tag as stored in `sa_family`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Family(libc::sa_family_t);

impl Family {
    pub const UNSPEC: Family = Family(libc::AF_UNSPEC as libc::sa_family_t);
    pub const UNIX: Family = Family(libc::AF_UNIX as libc::sa_family_t);
    pub const INET: Family = Family(libc::AF_INET as libc::sa_family_t);
    pub const INET6: Family = Family(libc::AF_INET6 as libc::sa_family_t);

    /// Wrap a raw family value.
    pub const fn from_raw(raw: libc::sa_family_t) -> Self {
        Self(raw)
    }

    /// The raw family value.
    pub const fn raw(self) -> libc::sa_family_t {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        match self {
            Family::UNSPEC => Some("AF_UNSPEC"),
            Family::UNIX => Some("AF_UNIX"),
            Family::INET => Some("AF_INET"),
            Family::INET6 => Some("AF_INET6"),
            _ => None,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "family {}", self.0),
        }
    }
}

impl fmt::Debug for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A socket address in the platform's native `sockaddr` layout.
///
/// The bytes are exactly what `bind`, `connect`, `sendmsg` and friends take,
/// and [`len`](Self::len) is the matching `socklen_t`. IPv4 and IPv6
/// addresses (and short Unix paths) fit in the inline storage of
/// [`SmallBuffer`]; longer Unix paths spill to the heap.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SocketAddress {
    buffer: SmallBuffer,
}

impl SocketAddress {
    /// An empty address (`AF_UNSPEC`, zero length).
    pub const fn new() -> Self {
        Self {
            buffer: SmallBuffer::new(),
        }
    }

    /// An empty address able to receive any address the kernel reports
    /// (`sockaddr_storage` capacity).
    pub fn for_receiving() -> Self {
        Self {
            buffer: SmallBuffer::with_capacity(mem::size_of::<libc::sockaddr_storage>()),
        }
    }

    /// Wrap raw `sockaddr` bytes as reported by the kernel.
    pub fn from_raw_bytes(bytes: &[u8]) -> Self {
        Self {
            buffer: SmallBuffer::from_slice(bytes),
        }
    }

    /// Build an address by letting `init` write a record into `capacity`
    /// bytes and report its length, as `accept`/`getsockname` do.
    ///
    /// # Panics
    ///
    /// Panics if `init` reports more than `capacity` bytes.
    pub fn with_uninitialized_capacity(
        capacity: usize,
        init: impl FnOnce(&mut [u8]) -> usize,
    ) -> Self {
        Self {
            buffer: SmallBuffer::with_uninitialized_capacity(capacity, init),
        }
    }

    /// Fallible form of
    /// [`with_uninitialized_capacity`](Self::with_uninitialized_capacity).
    pub fn try_with_uninitialized_capacity<E>(
        capacity: usize,
        init: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<Self, E> {
        SmallBuffer::try_with_uninitialized_capacity(capacity, init).map(|buffer| Self { buffer })
    }

    /// A Unix domain socket address for a filesystem path.
    pub fn unix(path: impl AsRef<Path>) -> Result<Self, AddressError> {
        let path = path.as_ref().as_os_str().as_bytes();
        if path.contains(&0) {
            return Err(AddressError::InteriorNul);
        }
        if path.len() >= SUN_PATH_LEN {
            return Err(AddressError::PathTooLong {
                len: path.len(),
                max: SUN_PATH_LEN - 1,
            });
        }

        let len = SUN_PATH_OFFSET + path.len() + 1;
        Ok(Self::with_uninitialized_capacity(len, |region| {
            region.fill(0);
            write_family(region, Family::UNIX);
            region[SUN_PATH_OFFSET..SUN_PATH_OFFSET + path.len()].copy_from_slice(path);
            len
        }))
    }

    /// An unnamed Unix domain socket address (family only).
    pub fn unnamed_unix() -> Self {
        Self::with_uninitialized_capacity(SUN_PATH_OFFSET, |region| {
            region.fill(0);
            write_family(region, Family::UNIX);
            SUN_PATH_OFFSET
        })
    }

    /// The family tag, or `AF_UNSPEC` if the record is too short to hold one.
    pub fn family(&self) -> Family {
        let bytes = self.as_bytes();
        if bytes.len() < FAMILY_OFFSET + FAMILY_SIZE {
            return Family::UNSPEC;
        }
        let mut raw = [0u8; FAMILY_SIZE];
        raw.copy_from_slice(&bytes[FAMILY_OFFSET..FAMILY_OFFSET + FAMILY_SIZE]);
        Family(libc::sa_family_t::from_ne_bytes(raw))
    }

    /// Convert an `AF_INET`/`AF_INET6` record to a std address.
    pub fn to_socket_addr(&self) -> Result<SocketAddr, AddressError> {
        match self.family() {
            Family::INET => {
                let raw: libc::sockaddr_in = self.read_record()?;
                let ip = Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());
                Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(raw.sin_port))))
            }
            Family::INET6 => {
                let raw: libc::sockaddr_in6 = self.read_record()?;
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(raw.sin6_addr.s6_addr),
                    u16::from_be(raw.sin6_port),
                    raw.sin6_flowinfo,
                    raw.sin6_scope_id,
                )))
            }
            other => Err(AddressError::UnsupportedFamily(u16::from(other.raw()))),
        }
    }

    /// The filesystem path of an `AF_UNIX` record.
    ///
    /// Returns `Ok(None)` for unnamed sockets and Linux abstract names.
    pub fn unix_path(&self) -> Result<Option<&Path>, AddressError> {
        let family = self.family();
        if family != Family::UNIX {
            return Err(AddressError::UnsupportedFamily(u16::from(family.raw())));
        }
        let bytes = self.as_bytes();
        let sun_path = bytes.get(SUN_PATH_OFFSET..).unwrap_or_default();
        let end = sun_path
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(sun_path.len());
        if end == 0 {
            return Ok(None);
        }
        Ok(Some(Path::new(OsStr::from_bytes(&sun_path[..end]))))
    }

    /// The record bytes (`socklen_t` = `len()`).
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// The record bytes, mutably. A shared heap store is copied first.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        self.buffer.as_mut_bytes()
    }

    /// Run `body` over the record bytes.
    pub fn with_bytes<R>(&self, body: impl FnOnce(&[u8]) -> R) -> R {
        self.buffer.with_bytes(body)
    }

    /// Run `body` over the record bytes, mutably.
    pub fn with_mut_bytes<R>(&mut self, body: impl FnOnce(&mut [u8]) -> R) -> R {
        self.buffer.with_mut_bytes(body)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Whether the record is held without a heap allocation.
    pub fn is_inline(&self) -> bool {
        self.buffer.is_inline()
    }

    /// Grow to `capacity` and hand out the whole writable region.
    pub(crate) fn prepare_receive(&mut self, capacity: usize) -> &mut [u8] {
        self.buffer.reserve(capacity);
        &mut self.buffer.as_mut_capacity()[..capacity]
    }

    /// Record the length the kernel reported, clamped to what was offered.
    pub(crate) fn commit_received(&mut self, reported: usize, capacity: usize) {
        self.buffer.set_len(reported.min(capacity));
    }

    fn read_record<T: Copy>(&self) -> Result<T, AddressError> {
        let bytes = self.as_bytes();
        let needed = mem::size_of::<T>();
        if bytes.len() < needed {
            return Err(AddressError::Truncated {
                len: bytes.len(),
                needed,
            });
        }
        // SAFETY: `bytes` holds at least `size_of::<T>()` initialized bytes and
        // is only used here with plain-integer `sockaddr_*` structs, for which
        // every bit pattern is valid. The read tolerates any alignment.
        Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
    }

    fn from_record<T>(record: &T) -> Self {
        // SAFETY: `record` is a fully initialized `sockaddr_*` struct made of
        // integer fields with no implicit padding.
        let bytes = unsafe {
            std::slice::from_raw_parts((record as *const T).cast::<u8>(), mem::size_of::<T>())
        };
        Self::from_raw_bytes(bytes)
    }
}

fn write_family(region: &mut [u8], family: Family) {
    region[FAMILY_OFFSET..FAMILY_OFFSET + FAMILY_SIZE].copy_from_slice(&family.raw().to_ne_bytes());
}

impl From<SocketAddrV4> for SocketAddress {
    fn from(addr: SocketAddrV4) -> Self {
        // SAFETY: `sockaddr_in` is plain integers; all-zero is a valid value.
        let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
        #[cfg(any(
            target_vendor = "apple",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        {
            raw.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
        }
        raw.sin_family = Family::INET.raw();
        raw.sin_port = addr.port().to_be();
        raw.sin_addr = libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        };
        Self::from_record(&raw)
    }
}

impl From<SocketAddrV6> for SocketAddress {
    fn from(addr: SocketAddrV6) -> Self {
        // SAFETY: `sockaddr_in6` is plain integers; all-zero is a valid value.
        let mut raw: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        #[cfg(any(
            target_vendor = "apple",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        {
            raw.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
        }
        raw.sin6_family = Family::INET6.raw();
        raw.sin6_port = addr.port().to_be();
        raw.sin6_flowinfo = addr.flowinfo();
        raw.sin6_addr = libc::in6_addr {
            s6_addr: addr.ip().octets(),
        };
        raw.sin6_scope_id = addr.scope_id();
        Self::from_record(&raw)
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => v4.into(),
            SocketAddr::V6(v6) => v6.into(),
        }
    }
}

impl TryFrom<&SocketAddress> for SocketAddr {
    type Error = AddressError;

    fn try_from(addr: &SocketAddress) -> Result<Self, Self::Error> {
        addr.to_socket_addr()
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family() {
            Family::INET | Family::INET6 => match self.to_socket_addr() {
                Ok(addr) => write!(f, "{addr}"),
                Err(err) => write!(f, "<{err}>"),
            },
            Family::UNIX => match self.unix_path() {
                Ok(Some(path)) => write!(f, "unix:{}", path.display()),
                _ => f.write_str("unix:(unnamed)"),
            },
            other => write!(f, "<{other}, {} bytes>", self.len()),
        }
    }
}

impl fmt::Debug for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketAddress")
            .field("family", &self.family())
            .field("len", &self.len())
            .field("display", &format_args!("{self}"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_address_is_unspecified() {
        let addr = SocketAddress::new();
        assert_eq!(addr.family(), Family::UNSPEC);
        assert!(addr.is_empty());
        assert!(matches!(
            addr.to_socket_addr(),
            Err(AddressError::UnsupportedFamily(_))
        ));
    }

    #[test]
    fn test_ipv4_round_trip_stays_inline() {
        let std_addr: SocketAddr = "192.168.1.20:8080".parse().unwrap();
        let addr = SocketAddress::from(std_addr);

        assert!(addr.is_inline());
        assert_eq!(addr.family(), Family::INET);
        assert_eq!(addr.len(), mem::size_of::<libc::sockaddr_in>());
        assert_eq!(addr.to_socket_addr().unwrap(), std_addr);
        assert_eq!(addr.to_string(), "192.168.1.20:8080");
    }

    #[test]
    fn test_ipv6_round_trip_stays_inline() {
        let std_addr = SocketAddrV6::new("fe80::1".parse().unwrap(), 443, 7, 3);
        let addr = SocketAddress::from(std_addr);

        assert!(addr.is_inline());
        assert_eq!(addr.family(), Family::INET6);
        assert_eq!(addr.len(), mem::size_of::<libc::sockaddr_in6>());
        assert_eq!(addr.to_socket_addr().unwrap(), SocketAddr::V6(std_addr));
    }

    #[test]
    fn test_port_is_stored_in_network_order() {
        let addr = SocketAddress::from(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0x1234));
        let port_offset = offset_of!(libc::sockaddr_in, sin_port);
        assert_eq!(&addr.as_bytes()[port_offset..port_offset + 2], &[0x12, 0x34]);
    }

    #[test]
    fn test_unix_path_round_trip() {
        let addr = SocketAddress::unix("/tmp/bufprims.sock").unwrap();
        assert_eq!(addr.family(), Family::UNIX);
        assert_eq!(addr.len(), SUN_PATH_OFFSET + "/tmp/bufprims.sock".len() + 1);
        assert_eq!(
            addr.unix_path().unwrap(),
            Some(Path::new("/tmp/bufprims.sock"))
        );
        assert_eq!(addr.to_string(), "unix:/tmp/bufprims.sock");
    }

    #[test]
    fn test_long_unix_path_spills_to_heap() {
        let path = format!("/tmp/{}", "p".repeat(60));
        let addr = SocketAddress::unix(&path).unwrap();
        assert!(!addr.is_inline());
        assert_eq!(addr.unix_path().unwrap(), Some(Path::new(&path)));
    }

    #[test]
    fn test_unix_path_too_long() {
        let path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let err = SocketAddress::unix(&path).unwrap_err();
        assert!(matches!(err, AddressError::PathTooLong { max, .. } if max == SUN_PATH_LEN - 1));
    }

    #[test]
    fn test_unix_path_rejects_nul() {
        let err = SocketAddress::unix("/tmp/a\0b").unwrap_err();
        assert!(matches!(err, AddressError::InteriorNul));
    }

    #[test]
    fn test_unnamed_unix_has_no_path() {
        let addr = SocketAddress::unnamed_unix();
        assert_eq!(addr.family(), Family::UNIX);
        assert_eq!(addr.unix_path().unwrap(), None);
        assert_eq!(addr.to_string(), "unix:(unnamed)");
    }

    #[test]
    fn test_truncated_inet_record_is_rejected() {
        let full = SocketAddress::from(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 80));
        let truncated = SocketAddress::from_raw_bytes(&full.as_bytes()[..6]);
        assert_eq!(truncated.family(), Family::INET);
        assert!(matches!(
            truncated.to_socket_addr(),
            Err(AddressError::Truncated { len: 6, .. })
        ));
    }

    #[test]
    fn test_uninitialized_capacity_records_reported_length() {
        let source = SocketAddress::from(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 53));
        let addr = SocketAddress::with_uninitialized_capacity(
            mem::size_of::<libc::sockaddr_storage>(),
            |region| {
                region[..source.len()].copy_from_slice(source.as_bytes());
                source.len()
            },
        );
        assert_eq!(addr, source);
        assert!(!addr.is_inline());
    }

    #[test]
    fn test_clone_mutation_is_isolated() {
        let original = SocketAddress::unix(format!("/tmp/{}", "q".repeat(50))).unwrap();
        let mut copy = original.clone();
        copy.with_mut_bytes(|bytes| {
            let last = bytes.len() - 2;
            bytes[last] = b'z';
        });
        assert_ne!(copy, original);
        assert!(original.unix_path().unwrap().unwrap().to_str().unwrap().ends_with('q'));
    }

    #[test]
    fn test_unknown_family_display() {
        let mut bytes = [0u8; 16];
        bytes[FAMILY_OFFSET..FAMILY_OFFSET + FAMILY_SIZE]
            .copy_from_slice(&(200 as libc::sa_family_t).to_ne_bytes());
        let addr = SocketAddress::from_raw_bytes(&bytes);
        assert_eq!(addr.to_string(), "<family 200, 16 bytes>");
    }
}
