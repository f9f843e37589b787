//! Copy-on-write byte buffers for systems plumbing.
//!
//! bufprims provides the storage types that sit between safe code and the
//! kernel: small-buffer-optimized socket addresses, `cmsghdr`-framed control
//! messages, and byte paths with an editable component view.
//!
//! # Crate Structure
//!
//! - [`store`] — Copy-on-write word-aligned storage and the inline/heap `SmallBuffer`
//! - [`net`] — Socket addresses, ancillary data, and `sendmsg`/`recvmsg` pass-throughs
//! - [`path`] — Normalized byte paths and their component view
//! - [`logging`] — `tracing-subscriber` setup (behind `logging` feature)

/// Re-export store types.
pub mod store {
    pub use bufprims_store::*;
}

/// Re-export socket address and control-message types.
pub mod net {
    pub use bufprims_net::*;
}

/// Re-export path types.
pub mod path {
    pub use bufprims_path::*;
}

#[cfg(feature = "logging")]
pub mod logging;
