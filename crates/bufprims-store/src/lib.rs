//! Copy-on-write byte storage with inline small-buffer optimization.
//!
//! This is the lowest layer of bufprims. Two value types live here:
//! - [`CowStore`] — a shared, fixed-capacity heap region that is copied only
//!   when a shared value is mutated, and grows geometrically on demand
//! - [`SmallBuffer`] — up to [`INLINE_CAPACITY`] bytes stored inline, spilling
//!   into a [`CowStore`] beyond that
//!
//! Neither type tracks anything but raw bytes. Structure (socket addresses,
//! control messages) is layered on top by `bufprims-net`.

pub mod small;
pub mod store;

pub use small::{SmallBuffer, INLINE_CAPACITY};
pub use store::{grown_capacity, CowStore, GROWTH_DENOMINATOR, GROWTH_NUMERATOR};
