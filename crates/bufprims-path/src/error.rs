/// Errors that can occur when building paths or components.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Paths are passed to the OS as C strings and cannot contain NUL.
    #[error("path contains an interior NUL byte")]
    InteriorNul,

    /// A component must be non-empty and free of separators and NUL.
    #[error("invalid path component {0:?}")]
    InvalidComponent(String),

    /// The path bytes are not valid UTF-8.
    #[error("path is not valid UTF-8")]
    NotUnicode,
}

pub type Result<T> = std::result::Result<T, PathError>;
