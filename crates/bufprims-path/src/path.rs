use std::cmp::Ordering;
use std::fmt;
use std::mem;
use std::str::FromStr;

use crate::component::{Component, ComponentKind, Root, SEPARATOR};
use crate::error::{PathError, Result};
use crate::view::{is_normalized, ComponentView, ComponentsMut};

/// A hierarchical `/`-separated path stored as normalized bytes.
///
/// Construction collapses separator runs and drops trailing separators, so
/// `"//usr///lib/"` and `"/usr/lib"` are the same path. `.` and `..` are
/// kept as written; see [`lexically_normalize`](Self::lexically_normalize).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FilePath {
    bytes: Vec<u8>,
}

impl FilePath {
    /// The empty relative path.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = bytes.as_ref();
        if bytes.contains(&0) {
            return Err(PathError::InteriorNul);
        }

        let mut normalized = Vec::with_capacity(bytes.len());
        if bytes.first() == Some(&SEPARATOR) {
            normalized.push(SEPARATOR);
        }
        let start = normalized.len();
        for part in bytes.split(|b| *b == SEPARATOR).filter(|p| !p.is_empty()) {
            if normalized.len() > start {
                normalized.push(SEPARATOR);
            }
            normalized.extend_from_slice(part);
        }
        Ok(Self { bytes: normalized })
    }

    /// Assemble a path from an optional root and a view of components.
    ///
    /// A root already encoded in the view's storage is kept; otherwise `root`
    /// is prepended.
    pub fn from_parts(root: Option<Root>, components: ComponentView) -> Self {
        let mut path = Self::new();
        path.restore_components(root, components);
        path
    }

    pub fn root(&self) -> Option<Root> {
        (self.bytes.first() == Some(&SEPARATOR)).then_some(Root)
    }

    pub fn is_absolute(&self) -> bool {
        self.root().is_some()
    }

    /// True for the empty relative path. `/` is not empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.bytes).map_err(|_| PathError::NotUnicode)
    }

    #[cfg(unix)]
    pub fn to_path_buf(&self) -> std::path::PathBuf {
        use std::os::unix::ffi::OsStrExt;
        std::ffi::OsStr::from_bytes(&self.bytes).into()
    }

    /// A detached copy of the components after the root.
    pub fn components(&self) -> ComponentView {
        ComponentView::from_storage(self.bytes.clone(), self.root_len())
    }

    /// Edit the components in place; changes are written back when the
    /// returned handle is dropped.
    pub fn components_mut(&mut self) -> ComponentsMut<'_> {
        ComponentsMut::new(self)
    }

    /// Replace every component, keeping this path's root.
    pub fn set_components(&mut self, components: ComponentView) {
        let root = if components.has_root() { None } else { self.root() };
        self.restore_components(root, components);
    }

    /// All components, the root first when there is one.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Component<'_>> + '_ {
        let root = self.root().map(|_| Component::root());
        let start = self.root_len();
        root.into_iter().chain(
            self.bytes[start..]
                .split(|b| *b == SEPARATOR)
                .filter(|part| !part.is_empty())
                .map(Component::new),
        )
    }

    /// The last component, or the root for `/`.
    pub fn last_component(&self) -> Option<Component<'_>> {
        self.iter().next_back()
    }

    /// Whether `base`'s components are a prefix of this path's.
    pub fn starts_with(&self, base: &FilePath) -> bool {
        let mut ours = self.iter();
        base.iter().all(|theirs| ours.next() == Some(theirs))
    }

    /// Append `other`. An absolute `other` replaces this path.
    pub fn push(&mut self, other: &FilePath) {
        if other.is_absolute() {
            self.bytes.clone_from(&other.bytes);
            return;
        }
        if other.is_empty() {
            return;
        }
        if self.bytes.len() > self.root_len() {
            self.bytes.push(SEPARATOR);
        }
        self.bytes.extend_from_slice(&other.bytes);
    }

    /// Remove the last component. Returns `false` when there is none.
    pub fn pop(&mut self) -> bool {
        self.components_mut().pop().is_some()
    }

    /// Remove `.` components and fold `name/..` pairs without touching the
    /// filesystem. Leading `..` survive in relative paths and are dropped at
    /// the root.
    pub fn lexically_normalize(&mut self) {
        let absolute = self.is_absolute();
        let mut kept: Vec<Component<'_>> = Vec::new();
        for component in self.iter() {
            match component.kind() {
                ComponentKind::Root | ComponentKind::CurrentDir => {}
                ComponentKind::ParentDir => {
                    if kept.last().is_some_and(|c| c.kind() == ComponentKind::Normal) {
                        kept.pop();
                    } else if !absolute {
                        kept.push(component);
                    }
                }
                ComponentKind::Normal => kept.push(component),
            }
        }
        let view: ComponentView = kept.iter().collect();
        let normalized = Self::from_parts(self.root(), view);
        *self = normalized;
    }

    pub(crate) fn take_components(&mut self) -> ComponentView {
        let start = self.root_len();
        ComponentView::from_storage(mem::take(&mut self.bytes), start)
    }

    pub(crate) fn restore_components(&mut self, root: Option<Root>, view: ComponentView) {
        let has_root = view.has_root();
        let (mut bytes, _) = view.into_storage();
        if !has_root && root.is_some() {
            bytes.insert(0, SEPARATOR);
        }
        self.bytes = bytes;
        debug_assert!(is_normalized(&self.bytes, self.root_len()), "{self:?}");
    }

    fn root_len(&self) -> usize {
        usize::from(self.root().is_some())
    }
}

impl TryFrom<&str> for FilePath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self> {
        Self::from_bytes(value)
    }
}

impl TryFrom<&[u8]> for FilePath {
    type Error = PathError;

    fn try_from(value: &[u8]) -> Result<Self> {
        Self::from_bytes(value)
    }
}

impl FromStr for FilePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_bytes(s)
    }
}

#[cfg(unix)]
impl TryFrom<&std::path::Path> for FilePath {
    type Error = PathError;

    fn try_from(value: &std::path::Path) -> Result<Self> {
        use std::os::unix::ffi::OsStrExt;
        Self::from_bytes(value.as_os_str().as_bytes())
    }
}

impl PartialOrd for FilePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilePath {
    /// Component-wise, so `/a/b` sorts before `/a-b`.
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter()
            .map(|c| c.as_bytes())
            .cmp(other.iter().map(|c| c.as_bytes()))
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

impl fmt::Debug for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilePath({:?})", String::from_utf8_lossy(&self.bytes))
    }
}
