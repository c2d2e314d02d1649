//! Shared vocabulary for the skyward deployment engine and its front ends.
//!
//! The engine, the CLI, and test doubles all speak in terms of the types
//! defined here: which backend a run targets, which operation it performs,
//! how operator input fields are described and validated, and the status
//! events emitted while a workflow runs.

pub mod deploy;

pub use deploy::*;
