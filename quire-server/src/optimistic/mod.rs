//! Optimistic mutation controllers
//!
//! - [`OptimisticList`]: add/update/remove/reorder on a local collection
//! - [`OptimisticMutation`]: single mutation with optimistic side effects

pub mod list;
pub mod mutation;

pub use list::{Identifiable, OptimisticList};
pub use mutation::{MutationState, OptimisticMutation};
