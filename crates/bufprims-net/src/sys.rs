//! Pass-throughs to the socket system calls that fill or consume the
//! buffers of this crate.
//!
//! These do no policy of their own. They build the native `msghdr`, retry on
//! `EINTR`, and truncate addresses and control data to exactly the lengths
//! the kernel reports.

use std::io::{self, IoSlice, IoSliceMut};
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd};

use tracing::debug;

use crate::address::SocketAddress;
use crate::ancillary::{space, AncillaryBuffer};
use crate::error::{NetError, Result};

/// Default control capacity: room for 16 descriptors.
pub const DEFAULT_CONTROL_CAPACITY: usize = space(16 * mem::size_of::<libc::c_int>());

/// Configuration for receiving messages.
#[derive(Debug, Clone)]
pub struct MessageConfig {
    /// Bytes offered to the kernel for the sender's address.
    pub address_capacity: usize,
    /// Bytes offered to the kernel for control messages.
    pub control_capacity: usize,
    /// `recvmsg` flags, e.g. `MSG_PEEK`.
    pub flags: libc::c_int,
    /// Fail with [`NetError::ControlTruncated`] when the kernel reports
    /// `MSG_CTRUNC`, instead of returning the partial control data.
    pub reject_truncated_control: bool,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            address_capacity: mem::size_of::<libc::sockaddr_storage>(),
            control_capacity: DEFAULT_CONTROL_CAPACITY,
            flags: 0,
            reject_truncated_control: false,
        }
    }
}

/// Outcome of [`receive_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Payload bytes received.
    pub bytes: usize,
    /// `msg_flags` as reported by the kernel.
    pub flags: libc::c_int,
}

impl ReceivedMessage {
    /// The kernel dropped control data that did not fit.
    pub fn control_truncated(&self) -> bool {
        self.flags & libc::MSG_CTRUNC != 0
    }

    /// The kernel dropped payload bytes that did not fit (datagrams).
    pub fn payload_truncated(&self) -> bool {
        self.flags & libc::MSG_TRUNC != 0
    }
}

/// Send `payload` with optional destination `address` and `control`
/// messages. Returns the number of payload bytes sent.
pub fn send_message(
    fd: impl AsFd,
    payload: &[IoSlice<'_>],
    address: Option<&SocketAddress>,
    control: &AncillaryBuffer,
    flags: libc::c_int,
) -> Result<usize> {
    let fd = fd.as_fd().as_raw_fd();
    let control_bytes = control.as_bytes();

    // SAFETY: `msghdr` is plain data; all-zero (null pointers, zero lengths)
    // is a valid empty header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    if let Some(address) = address {
        msg.msg_name = address.as_bytes().as_ptr() as *mut libc::c_void;
        msg.msg_namelen = address.len() as libc::socklen_t;
    }
    // `IoSlice` is guaranteed ABI compatible with `iovec` on Unix.
    msg.msg_iov = payload.as_ptr() as *mut libc::iovec;
    msg.msg_iovlen = payload.len() as _;
    if !control_bytes.is_empty() {
        msg.msg_control = control_bytes.as_ptr() as *mut libc::c_void;
        msg.msg_controllen = control_bytes.len() as _;
    }

    loop {
        // SAFETY: every pointer in `msg` refers to a live borrow held for the
        // duration of the call; the kernel only reads through them.
        let rc = unsafe { libc::sendmsg(fd, &msg, flags) };
        if rc >= 0 {
            debug!(
                bytes = rc,
                address_len = msg.msg_namelen,
                control_len = control_bytes.len(),
                "sendmsg"
            );
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(NetError::Io(err));
        }
    }
}

/// Receive into `payload`, overwriting `address` with the sender's address
/// and `control` with the received control messages.
///
/// Both are truncated to the lengths the kernel reports, never beyond the
/// capacities in `config`.
pub fn receive_message(
    fd: impl AsFd,
    payload: &mut [IoSliceMut<'_>],
    address: &mut SocketAddress,
    control: &mut AncillaryBuffer,
    config: &MessageConfig,
) -> Result<ReceivedMessage> {
    let fd = fd.as_fd().as_raw_fd();
    let address_capacity = config.address_capacity;
    let control_capacity = config.control_capacity;

    // SAFETY: see `send_message`.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = payload.as_mut_ptr() as *mut libc::iovec;
    msg.msg_iovlen = payload.len() as _;

    let name = address.prepare_receive(address_capacity);
    if !name.is_empty() {
        msg.msg_name = name.as_mut_ptr().cast::<libc::c_void>();
    }
    let control_region = control.prepare_receive(control_capacity);
    if !control_region.is_empty() {
        msg.msg_control = control_region.as_mut_ptr().cast::<libc::c_void>();
    }

    let rc = loop {
        msg.msg_namelen = address_capacity as libc::socklen_t;
        msg.msg_controllen = if msg.msg_control.is_null() {
            0
        } else {
            control_capacity as _
        };
        // SAFETY: `msg_name` and `msg_control` point into regions of exactly
        // the advertised lengths, uniquely borrowed for the call; `msg_iov`
        // describes the caller's writable slices.
        let rc = unsafe { libc::recvmsg(fd, &mut msg, config.flags) };
        if rc >= 0 {
            break rc as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            address.commit_received(0, address_capacity);
            control.commit_received(0, control_capacity);
            return Err(NetError::Io(err));
        }
    };

    let address_len = msg.msg_namelen as usize;
    let control_len = msg.msg_controllen as usize;
    address.commit_received(address_len, address_capacity);
    control.commit_received(control_len, control_capacity);

    let received = ReceivedMessage {
        bytes: rc,
        flags: msg.msg_flags,
    };
    debug!(
        bytes = rc,
        address_len,
        control_len,
        control_truncated = received.control_truncated(),
        "recvmsg"
    );

    if received.control_truncated() && config.reject_truncated_control {
        return Err(NetError::ControlTruncated {
            capacity: control_capacity,
        });
    }
    Ok(received)
}

/// The address `fd` is bound to (`getsockname`).
pub fn local_address(fd: impl AsFd) -> Result<SocketAddress> {
    let fd = fd.as_fd().as_raw_fd();
    query_address(|name, len| {
        // SAFETY: `name` is writable for `*len` bytes.
        unsafe { libc::getsockname(fd, name, len) }
    })
}

/// The address of the peer `fd` is connected to (`getpeername`).
pub fn peer_address(fd: impl AsFd) -> Result<SocketAddress> {
    let fd = fd.as_fd().as_raw_fd();
    query_address(|name, len| {
        // SAFETY: `name` is writable for `*len` bytes.
        unsafe { libc::getpeername(fd, name, len) }
    })
}

/// [`local_address`] as a std IP address.
pub fn local_socket_addr(fd: impl AsFd) -> Result<SocketAddr> {
    Ok(local_address(fd)?.to_socket_addr()?)
}

/// [`peer_address`] as a std IP address.
pub fn peer_socket_addr(fd: impl AsFd) -> Result<SocketAddr> {
    Ok(peer_address(fd)?.to_socket_addr()?)
}

fn query_address(
    call: impl Fn(*mut libc::sockaddr, *mut libc::socklen_t) -> libc::c_int,
) -> Result<SocketAddress> {
    // SAFETY: `sockaddr_storage` is plain data; all-zero is a valid value.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let capacity = mem::size_of::<libc::sockaddr_storage>();
    let mut len = capacity as libc::socklen_t;
    if call((&mut storage as *mut libc::sockaddr_storage).cast(), &mut len) < 0 {
        return Err(NetError::Io(io::Error::last_os_error()));
    }

    // Copy out only what the kernel reported so IP addresses land inline.
    // SAFETY: `storage` is initialized for its full size.
    let bytes = unsafe {
        std::slice::from_raw_parts((&storage as *const libc::sockaddr_storage).cast::<u8>(), capacity)
    };
    let address = SocketAddress::from_raw_bytes(&bytes[..(len as usize).min(capacity)]);
    debug!(family = %address.family(), len = address.len(), "queried socket address");
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::{UnixDatagram, UnixListener, UnixStream};

    use crate::address::Family;
    use crate::error::AddressError;

    fn temp_socket_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("bufprims-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("test.sock")
    }

    #[test]
    fn test_stream_pair_round_trip_with_control() {
        let (left, right) = UnixStream::pair().unwrap();

        let mut control = AncillaryBuffer::new();
        control.append_fds(&[left.as_raw_fd()]);
        let sent = send_message(&left, &[IoSlice::new(b"hello")], None, &control, 0).unwrap();
        assert_eq!(sent, 5);

        let mut payload = [0u8; 16];
        let mut address = SocketAddress::for_receiving();
        let mut received = AncillaryBuffer::new();
        let outcome = receive_message(
            &right,
            &mut [IoSliceMut::new(&mut payload)],
            &mut address,
            &mut received,
            &MessageConfig::default(),
        )
        .unwrap();

        assert_eq!(&payload[..outcome.bytes], b"hello");
        assert!(!outcome.control_truncated());
        let fds: Vec<_> = received
            .messages()
            .filter_map(|message| message.fds())
            .flatten()
            .collect();
        assert_eq!(fds.len(), 1);
        // SAFETY: the descriptor was just received and is owned by us.
        unsafe { libc::close(fds[0]) };
    }

    #[test]
    fn test_control_capacity_limits_received_length() {
        let (left, right) = UnixStream::pair().unwrap();

        let mut control = AncillaryBuffer::new();
        control.append_fds(&[left.as_raw_fd(), right.as_raw_fd()]);
        send_message(&left, &[IoSlice::new(b"x")], None, &control, 0).unwrap();

        let config = MessageConfig {
            control_capacity: 8,
            ..MessageConfig::default()
        };
        let mut payload = [0u8; 4];
        let mut address = SocketAddress::new();
        let mut received = AncillaryBuffer::new();
        let outcome = receive_message(
            &right,
            &mut [IoSliceMut::new(&mut payload)],
            &mut address,
            &mut received,
            &config,
        )
        .unwrap();

        assert!(outcome.control_truncated());
        assert!(received.len() <= 8);
        assert_eq!(received.messages().count(), 0);
    }

    #[test]
    fn test_truncated_control_can_be_rejected() {
        let (left, right) = UnixStream::pair().unwrap();

        let mut control = AncillaryBuffer::new();
        control.append_fds(&[left.as_raw_fd()]);
        send_message(&left, &[IoSlice::new(b"x")], None, &control, 0).unwrap();

        let config = MessageConfig {
            control_capacity: 4,
            reject_truncated_control: true,
            ..MessageConfig::default()
        };
        let mut payload = [0u8; 4];
        let err = receive_message(
            &right,
            &mut [IoSliceMut::new(&mut payload)],
            &mut SocketAddress::new(),
            &mut AncillaryBuffer::new(),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, NetError::ControlTruncated { capacity: 4 }));
    }

    #[test]
    fn test_datagram_sender_address_is_reported() {
        let receiver_path = temp_socket_path("dgram-rx");
        let sender_path = temp_socket_path("dgram-tx").with_file_name("tx.sock");
        let _ = std::fs::remove_file(&receiver_path);
        let _ = std::fs::remove_file(&sender_path);

        let receiver = UnixDatagram::bind(&receiver_path).unwrap();
        let sender = UnixDatagram::bind(&sender_path).unwrap();
        let destination = SocketAddress::unix(&receiver_path).unwrap();
        send_message(
            &sender,
            &[IoSlice::new(b"ping")],
            Some(&destination),
            &AncillaryBuffer::new(),
            0,
        )
        .unwrap();

        let mut payload = [0u8; 8];
        let mut address = SocketAddress::for_receiving();
        let outcome = receive_message(
            &receiver,
            &mut [IoSliceMut::new(&mut payload)],
            &mut address,
            &mut AncillaryBuffer::new(),
            &MessageConfig::default(),
        )
        .unwrap();

        assert_eq!(&payload[..outcome.bytes], b"ping");
        assert_eq!(address.family(), Family::UNIX);
        assert_eq!(address.unix_path().unwrap(), Some(sender_path.as_path()));

        let _ = std::fs::remove_file(&receiver_path);
        let _ = std::fs::remove_file(&sender_path);
    }

    #[test]
    fn test_local_and_peer_addresses() {
        let path = temp_socket_path("names");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        let client = UnixStream::connect(&path).unwrap();

        let local = local_address(&listener).unwrap();
        assert_eq!(local.unix_path().unwrap(), Some(path.as_path()));

        let peer = peer_address(&client).unwrap();
        assert_eq!(peer, local);

        drop(client);
        drop(listener);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_tcp_local_address_round_trips_through_std() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let local = local_address(&listener).unwrap();
        assert!(local.is_inline());
        assert_eq!(local.to_socket_addr().unwrap(), listener.local_addr().unwrap());
    }

    #[test]
    fn test_std_addresses_from_tcp_pair() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert_eq!(local_socket_addr(&listener).unwrap(), listener.local_addr().unwrap());
        assert_eq!(peer_socket_addr(&client).unwrap(), listener.local_addr().unwrap());
    }

    #[test]
    fn test_std_address_of_unix_socket_is_an_address_error() {
        let (a, _b) = UnixStream::pair().unwrap();
        let err = local_socket_addr(&a).unwrap_err();
        assert!(
            matches!(err, NetError::Address(AddressError::UnsupportedFamily(_))),
            "{err:?}"
        );
    }
}
