//! Folder listing sessions for docshelf.
//!
//! A [`ListingSession`] pages through one folder of one provider with
//! sort, filter and search parameters. [`spawn_search_debouncer`] coalesces
//! rapid search edits into single reloads.

mod debounce;
mod error;
mod session;

pub use debounce::{SEARCH_CHANNEL_SIZE, spawn_search_debouncer};
pub use error::{ListingError, ListingResult};
pub use session::{ListingSession, ListingState, PageTicket};
