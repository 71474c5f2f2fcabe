//! Reference storage providers for docshelf.
//!
//! - [`MemoryProvider`]: an in-memory account with failure injection, used
//!   to drive the engine deterministically.
//! - [`LocalProvider`]: device storage rooted at a directory.

mod local;
mod memory;
mod query;

pub use local::{LocalProvider, TRASH_DIR};
pub use memory::{MemoryProvider, Operation, ROOT_ID, TRASH_ID};
pub use query::{matches_filter, matches_search, page_from};
