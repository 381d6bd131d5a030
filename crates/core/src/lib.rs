//! Domain types shared by the dispatcher and the HTTP façade.
//!
//! Holds the job model and its lifecycle rules, the concurrent
//! [`JobStore`](store::JobStore), the backend endpoint resolver and the
//! shared error type. Nothing in this crate performs I/O.

pub mod endpoint;
pub mod error;
pub mod job;
pub mod store;
pub mod types;
