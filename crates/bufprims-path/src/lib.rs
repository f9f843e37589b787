//! Byte-oriented file paths with an editable component view.
//!
//! A [`FilePath`] stores its bytes in normalized form (one separator per
//! boundary, no trailing separator). Its [`ComponentView`] parses the part
//! after the root on demand and can be edited like a sequence; edits are
//! written back to the path when the [`ComponentsMut`] guard is dropped.
//!
//! ```
//! use bufprims_path::{ComponentKind, FilePath};
//!
//! let mut path = FilePath::try_from("/./home/./user").unwrap();
//! path.components_mut().retain(|c| c.kind() != ComponentKind::CurrentDir);
//! assert_eq!(path.to_string(), "/home/user");
//! ```

pub mod component;
pub mod error;
pub mod path;
pub mod view;

pub use component::{Component, ComponentBuf, ComponentKind, Root, SEPARATOR};
pub use error::{PathError, Result};
pub use path::FilePath;
pub use view::{ComponentIndex, ComponentView, ComponentsMut, Indices, Iter};
