//! Query controllers
//!
//! - [`CachedQuery`]: cache-first, stale-while-revalidate subscription
//! - [`PagedQuery`]: cache-first pagination with short-page exhaustion

pub mod cached;
pub mod paged;

pub use cached::{CachedQuery, Fetcher, QueryOptions, QueryState, QueryStatus};
pub use paged::{PageFetcher, PagedOptions, PagedQuery, PagedState};
