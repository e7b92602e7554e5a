//! Background sync: durable queue of mutations that could not be delivered.

mod mutation;
mod queue;

pub use mutation::{Mutation, SyncTag};
pub use queue::{DrainReport, SyncQueue};
