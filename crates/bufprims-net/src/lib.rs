//! Socket address storage and control-message framing.
//!
//! Provides the byte-exact records the kernel reads and writes around
//! `sendmsg`/`recvmsg`-style calls:
//! - [`SocketAddress`] — an address-family-tagged `sockaddr` record kept in a
//!   [`SmallBuffer`](bufprims_store::SmallBuffer), inline for IP addresses
//! - [`AncillaryBuffer`] — `cmsghdr`-framed control messages with a lazy,
//!   bounds-checked view over them
//! - [`sys`] — thin pass-throughs that fill both from the kernel and truncate
//!   them to the lengths it reports

#[cfg(unix)]
pub mod address;
#[cfg(unix)]
pub mod ancillary;
pub mod error;
#[cfg(unix)]
pub mod sys;

#[cfg(unix)]
pub use address::{Family, SocketAddress};
#[cfg(unix)]
pub use ancillary::{
    AncillaryBuffer, Message, MessageIndex, Messages, OwnedMessage, ScmRights, HEADER_SIZE,
};
pub use error::{AddressError, NetError, Result};
#[cfg(unix)]
pub use sys::{MessageConfig, ReceivedMessage};
