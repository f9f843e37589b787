/// Errors produced when interpreting or building a socket address record.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    /// The record carries a family this crate cannot convert.
    #[error("unsupported address family {0}")]
    UnsupportedFamily(u16),

    /// The record is shorter than its family's fixed layout.
    #[error("address record truncated ({len} bytes, need {needed})")]
    Truncated { len: usize, needed: usize },

    /// The Unix socket path does not fit in `sun_path`.
    #[error("socket path too long ({len} bytes, max {max})")]
    PathTooLong { len: usize, max: usize },

    /// The Unix socket path contains a NUL byte.
    #[error("socket path contains an interior NUL byte")]
    InteriorNul,
}

/// Errors that can occur while passing messages through a socket.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The system call failed.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An address could not be interpreted.
    #[error("invalid socket address: {0}")]
    Address(#[from] AddressError),

    /// The kernel dropped control data that did not fit the buffer.
    #[error("control data truncated (capacity {capacity} bytes)")]
    ControlTruncated { capacity: usize },
}

pub type Result<T> = std::result::Result<T, NetError>;
