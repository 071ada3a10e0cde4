//! Local mirror of remote document repositories.
//!
//! The [`Store`] keeps [`File`] and [`Repository`] records keyed by URL and
//! reconciles them with a remote host through a
//! [`Gateway`](docmirror_gateway::Gateway). On top of plain synchronization
//! it can install a file from a foreign repository into the main one (copying
//! the assets it references), delete installed files without orphaning
//! shared assets, and renumber episodes.
//!
//! Remote failures never surface as errors: they're recorded in
//! [`Store::errors`] and the operation returns `Ok(None)`. The same sentinel
//! is returned when another operation on the same resource is in flight.

mod busy;
mod consts;
mod delete;
pub mod deps;
mod episodes;
pub mod error;
mod install;
mod models;
mod store;
mod sync;
#[cfg(test)]
mod test_support;

pub use crate::busy::{BusyFlags, BusyGuard};
pub use crate::models::{
    DeleteTally, ErrorRecord, FetchOptions, File, NewFile, Repository, RepositoryView, SaveSummary,
};
pub use crate::store::Store;
