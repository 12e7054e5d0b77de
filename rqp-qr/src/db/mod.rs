//! Database access layer for rqp-qr
//!
//! Every function issues a single logical mutation and commits immediately,
//! so changes are visible to other readers as soon as the call returns.

pub mod jobs;
pub mod queries;

pub use jobs::{Job, JobQueue};
pub use queries::QueryRow;
