//! Durable queue of mutating requests that could not be delivered.
//!
//! Entries are `Pending` from the failed delivery until a replay attempt gets
//! an HTTP-ok response, at which point they are removed. Nothing in between is
//! persisted, so an interrupted replay simply retries the entry next time.

mod store;
mod types;

pub use store::{QueueStore, SqliteQueue};
pub use types::{NewRequest, QueueMethod, QueuedRequest};
