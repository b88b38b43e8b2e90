//! Arena storage for index-owned records.
//!
//! Tree nodes and pointer records are stored in slabs and linked by compact
//! 32-bit indices instead of references, so the index owns every record and
//! handles can refer to them without borrowing.
//!
//! ## Module Structure
//!
//! - `index_types` - Compact index types (`SlabIndex`, `OptionSlabIndex`)
//! - `entry` - Internal entry enum for slab slots
//! - `slab` - Free-list slab allocator (`Slab<T>`)
//! - `thin` - High-level wrapper (`ThinSlab<T>`)

mod entry;
mod index_types;
mod slab;
mod thin;

pub use index_types::{OptionSlabIndex, SlabIndex};
pub use slab::Slab;
pub use thin::ThinSlab;
