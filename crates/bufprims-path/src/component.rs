use std::fmt;

use crate::error::{PathError, Result};

/// The path separator.
pub const SEPARATOR: u8 = b'/';

/// What a component denotes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// The leading `/` of an absolute path.
    Root,
    /// `.`
    CurrentDir,
    /// `..`
    ParentDir,
    /// Anything else.
    Normal,
}

/// The root of an absolute path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Root;

impl Root {
    pub fn as_bytes(self) -> &'static [u8] {
        &[SEPARATOR]
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/")
    }
}

/// One path component, borrowed from the path or view it was read from.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Component<'a> {
    bytes: &'a [u8],
}

impl<'a> Component<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn root() -> Component<'static> {
        Component {
            bytes: Root.as_bytes(),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        match self.bytes {
            [SEPARATOR] => ComponentKind::Root,
            b"." => ComponentKind::CurrentDir,
            b".." => ComponentKind::ParentDir,
            _ => ComponentKind::Normal,
        }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The component as UTF-8, if it is.
    pub fn to_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.bytes).ok()
    }

    /// The part after the last `.`, ignoring a leading dot (`.bashrc` has no
    /// extension) and the special `.`/`..` components.
    pub fn extension(&self) -> Option<&'a [u8]> {
        self.split_extension().1
    }

    /// The component without its [`extension`](Self::extension).
    pub fn stem(&self) -> &'a [u8] {
        self.split_extension().0
    }

    /// Copy into an owned component. Returns `None` for the root.
    pub fn to_component_buf(&self) -> Option<ComponentBuf> {
        (self.kind() != ComponentKind::Root).then(|| ComponentBuf {
            bytes: self.bytes.to_vec(),
        })
    }

    fn split_extension(&self) -> (&'a [u8], Option<&'a [u8]>) {
        if self.kind() != ComponentKind::Normal {
            return (self.bytes, None);
        }
        match self.bytes.iter().rposition(|b| *b == b'.') {
            Some(0) | None => (self.bytes, None),
            Some(dot) => (&self.bytes[..dot], Some(&self.bytes[dot + 1..])),
        }
    }
}

impl AsRef<[u8]> for Component<'_> {
    fn as_ref(&self) -> &[u8] {
        self.bytes
    }
}

impl fmt::Display for Component<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.bytes))
    }
}

impl fmt::Debug for Component<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?})", self.kind(), String::from_utf8_lossy(self.bytes))
    }
}

/// An owned, validated path component: non-empty, without separators or NUL.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentBuf {
    bytes: Vec<u8>,
}

impl ComponentBuf {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if !is_valid_component(&bytes) {
            return Err(PathError::InvalidComponent(
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }
        Ok(Self { bytes })
    }

    pub fn as_component(&self) -> Component<'_> {
        Component::new(&self.bytes)
    }

    pub fn kind(&self) -> ComponentKind {
        self.as_component().kind()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl TryFrom<&str> for ComponentBuf {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl AsRef<[u8]> for ComponentBuf {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for ComponentBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_component(), f)
    }
}

impl fmt::Debug for ComponentBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.as_component(), f)
    }
}

pub(crate) fn is_valid_component(bytes: &[u8]) -> bool {
    !bytes.is_empty() && !bytes.iter().any(|b| *b == SEPARATOR || *b == 0)
}
