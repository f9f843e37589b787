use std::fmt;
use std::iter::FusedIterator;
use std::mem;
use std::ops::{Deref, DerefMut, Range};

use tracing::trace;

use crate::component::{is_valid_component, Component, ComponentBuf, Root, SEPARATOR};
use crate::path::FilePath;

/// A position in a [`ComponentView`]: the byte offset where a component
/// starts, or the end of the storage.
///
/// Indices are only meaningful for the view they came from, and only until
/// that view is next mutated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentIndex(usize);

impl ComponentIndex {
    pub fn offset(self) -> usize {
        self.0
    }
}

/// The components of a path after its root, as an editable sequence.
///
/// The view owns the path's bytes (root included) and parses them lazily:
/// every index step and every [`get`](Self::get) re-reads the bytes, nothing
/// derived is cached. Runs of separators are treated as one boundary when
/// parsing; edits always write exactly one.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ComponentView {
    bytes: Vec<u8>,
    start: usize,
}

impl ComponentView {
    /// An empty view with no root.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_storage(bytes: Vec<u8>, start: usize) -> Self {
        Self { bytes, start }
    }

    pub(crate) fn into_storage(self) -> (Vec<u8>, usize) {
        (self.bytes, self.start)
    }

    /// Whether the underlying storage begins with a root.
    pub fn has_root(&self) -> bool {
        self.start > 0
    }

    /// The bytes after the root.
    pub fn relative_bytes(&self) -> &[u8] {
        &self.bytes[self.start..]
    }

    pub fn start_index(&self) -> ComponentIndex {
        ComponentIndex(skip_separators(&self.bytes, self.start))
    }

    pub fn end_index(&self) -> ComponentIndex {
        ComponentIndex(self.bytes.len())
    }

    /// The index of the component following the one at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is the end index or outside the view.
    pub fn index_after(&self, index: ComponentIndex) -> ComponentIndex {
        self.check_index(index);
        assert!(index != self.end_index(), "cannot advance past the end index");
        let end = component_end(&self.bytes, index.0);
        ComponentIndex(skip_separators(&self.bytes, end))
    }

    /// The index of the component preceding `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is the start index or outside the view.
    pub fn index_before(&self, index: ComponentIndex) -> ComponentIndex {
        self.check_index(index);
        assert!(
            index > self.start_index(),
            "cannot step back from the start index"
        );
        let mut end = index.0;
        while end > self.start && self.bytes[end - 1] == SEPARATOR {
            end -= 1;
        }
        let mut begin = end;
        while begin > self.start && self.bytes[begin - 1] != SEPARATOR {
            begin -= 1;
        }
        ComponentIndex(begin)
    }

    /// The component starting at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is the end index or outside the view.
    pub fn get(&self, index: ComponentIndex) -> Component<'_> {
        self.check_index(index);
        assert!(index != self.end_index(), "no component at the end index");
        let end = component_end(&self.bytes, index.0);
        Component::new(&self.bytes[index.0..end])
    }

    /// Number of components. O(n).
    pub fn len(&self) -> usize {
        self.indices().count()
    }

    pub fn is_empty(&self) -> bool {
        self.start_index() == self.end_index()
    }

    pub fn first(&self) -> Option<Component<'_>> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<Component<'_>> {
        self.iter().next_back()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            indices: self.indices(),
        }
    }

    pub fn indices(&self) -> Indices<'_> {
        Indices {
            view: self,
            front: self.start_index(),
            back: self.end_index(),
        }
    }

    /// Replace the components in `range` with `components`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is not inside the view, or if any new component is
    /// empty or contains a separator or NUL byte.
    pub fn replace_range<I>(&mut self, range: Range<ComponentIndex>, components: I)
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let components: Vec<I::Item> = components.into_iter().collect();
        for component in &components {
            assert!(
                is_valid_component(component.as_ref()),
                "invalid path component {:?}",
                String::from_utf8_lossy(component.as_ref())
            );
        }
        self.check_index(range.start);
        self.check_index(range.end);
        assert!(range.start <= range.end, "component range is reversed");

        if self.is_empty() {
            self.bytes.truncate(self.start);
            self.bytes.extend(join(&components));
        } else if components.is_empty() {
            let reaches_end = range.end == self.end_index();
            self.bytes.drain(range.start.0..range.end.0);
            if reaches_end {
                while self.bytes.len() > self.start && self.bytes.last() == Some(&SEPARATOR) {
                    self.bytes.pop();
                }
            }
        } else {
            let end = self.end_index();
            let mut span = Vec::new();
            if range.start == end {
                span.push(SEPARATOR);
            }
            span.extend(join(&components));
            if range.end != end {
                span.push(SEPARATOR);
            }
            self.bytes.splice(range.start.0..range.end.0, span);
        }
        debug_assert!(is_normalized(&self.bytes, self.start), "{self:?}");
    }

    /// Append a component.
    pub fn push(&mut self, component: impl AsRef<[u8]>) {
        let end = self.end_index();
        self.replace_range(end..end, [component]);
    }

    /// Insert a component before `index`.
    pub fn insert(&mut self, index: ComponentIndex, component: impl AsRef<[u8]>) {
        self.replace_range(index..index, [component]);
    }

    /// Remove and return the component at `index`.
    pub fn remove(&mut self, index: ComponentIndex) -> ComponentBuf {
        let removed = self.owned(index);
        let next = self.index_after(index);
        self.remove_range(index..next);
        removed
    }

    /// Remove and return the last component.
    pub fn pop(&mut self) -> Option<ComponentBuf> {
        if self.is_empty() {
            return None;
        }
        let last = self.index_before(self.end_index());
        Some(self.remove(last))
    }

    pub fn remove_range(&mut self, range: Range<ComponentIndex>) {
        self.replace_range(range, std::iter::empty::<&[u8]>());
    }

    /// Remove every component, keeping the root.
    pub fn clear(&mut self) {
        let range = self.start_index()..self.end_index();
        self.remove_range(range);
    }

    /// Keep only the components for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(Component<'_>) -> bool) {
        let kept: Vec<ComponentBuf> = self
            .iter()
            .filter(|component| keep(*component))
            .filter_map(|component| component.to_component_buf())
            .collect();
        let range = self.start_index()..self.end_index();
        self.replace_range(range, kept);
    }

    fn owned(&self, index: ComponentIndex) -> ComponentBuf {
        let component = self.get(index);
        match component.to_component_buf() {
            Some(owned) => owned,
            None => unreachable!("views never yield the root component"),
        }
    }

    fn check_index(&self, index: ComponentIndex) {
        assert!(
            index.0 >= self.start && index.0 <= self.bytes.len(),
            "component index {} outside view {}..{}",
            index.0,
            self.start,
            self.bytes.len()
        );
    }
}

impl<C: AsRef<[u8]>> Extend<C> for ComponentView {
    fn extend<I: IntoIterator<Item = C>>(&mut self, iter: I) {
        let end = self.end_index();
        self.replace_range(end..end, iter);
    }
}

impl<C: AsRef<[u8]>> FromIterator<C> for ComponentView {
    /// Build a root-less view. Use [`FilePath::from_parts`] to attach a root.
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        let mut view = Self::new();
        view.extend(iter);
        view
    }
}

impl<'a> IntoIterator for &'a ComponentView {
    type Item = Component<'a>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for ComponentView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentView")
            .field("root", &self.has_root().then_some(Root))
            .field("components", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

/// Double-ended iterator over the indices of a [`ComponentView`].
#[derive(Clone)]
pub struct Indices<'a> {
    view: &'a ComponentView,
    front: ComponentIndex,
    back: ComponentIndex,
}

impl Iterator for Indices<'_> {
    type Item = ComponentIndex;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        let index = self.front;
        self.front = self.view.index_after(index);
        Some(index)
    }
}

impl DoubleEndedIterator for Indices<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        self.back = self.view.index_before(self.back);
        Some(self.back)
    }
}

impl FusedIterator for Indices<'_> {}

/// Double-ended iterator over the components of a [`ComponentView`].
#[derive(Clone)]
pub struct Iter<'a> {
    indices: Indices<'a>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Component<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let view = self.indices.view;
        self.indices.next().map(|index| view.get(index))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let view = self.indices.view;
        self.indices.next_back().map(|index| view.get(index))
    }
}

impl FusedIterator for Iter<'_> {}

/// Write-back handle returned by [`FilePath::components_mut`].
///
/// Dereferences to the path's [`ComponentView`]. The path's bytes are moved
/// into the view for the duration of the borrow and moved back on drop. If
/// the view was replaced by one without a root, the path's original root is
/// re-attached.
pub struct ComponentsMut<'a> {
    path: &'a mut FilePath,
    view: ComponentView,
    root: Option<Root>,
}

impl<'a> ComponentsMut<'a> {
    pub(crate) fn new(path: &'a mut FilePath) -> Self {
        let root = path.root();
        let view = path.take_components();
        Self { path, view, root }
    }
}

impl Deref for ComponentsMut<'_> {
    type Target = ComponentView;

    fn deref(&self) -> &ComponentView {
        &self.view
    }
}

impl DerefMut for ComponentsMut<'_> {
    fn deref_mut(&mut self) -> &mut ComponentView {
        &mut self.view
    }
}

impl Drop for ComponentsMut<'_> {
    fn drop(&mut self) {
        let view = mem::take(&mut self.view);
        let root = if view.has_root() { None } else { self.root };
        trace!(len = view.bytes.len(), reattach_root = root.is_some(), "writing back components");
        self.path.restore_components(root, view);
    }
}

fn skip_separators(bytes: &[u8], mut at: usize) -> usize {
    while at < bytes.len() && bytes[at] == SEPARATOR {
        at += 1;
    }
    at
}

fn component_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| *b == SEPARATOR)
        .map_or(bytes.len(), |offset| start + offset)
}

fn join<C: AsRef<[u8]>>(components: &[C]) -> Vec<u8> {
    let mut joined = Vec::new();
    for (i, component) in components.iter().enumerate() {
        if i > 0 {
            joined.push(SEPARATOR);
        }
        joined.extend_from_slice(component.as_ref());
    }
    joined
}

/// One separator per boundary and none trailing after `start`.
pub(crate) fn is_normalized(bytes: &[u8], start: usize) -> bool {
    let relative = &bytes[start..];
    relative.first() != Some(&SEPARATOR)
        && relative.last() != Some(&SEPARATOR)
        && !relative.windows(2).any(|w| w == [SEPARATOR, SEPARATOR])
}
