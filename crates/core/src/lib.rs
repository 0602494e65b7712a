//! Injector core: JSON patch operations, path resolution and the patch builder.
//!
//! Everything here is a pure, synchronous transform. A `PatchBuilder` is created
//! per admission request, fed in a fixed order, and consumed by `build()`.

#![forbid(unsafe_code)]

mod builder;
mod patch;
mod path;

pub use builder::PatchBuilder;
pub use patch::{PatchDocument, PatchError, PatchOp, PatchOperation};
pub use path::{PathResolver, WorkloadKind};
