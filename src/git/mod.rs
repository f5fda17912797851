//! Git command wrappers and the append workflow built on them.
//!
//! All operations shell out to the `git` binary using `tokio::process::Command`
//! and run inside a request-scoped [`ScratchWorkspace`].  Credentials reach git
//! only through the clone URL; nothing is written to global git configuration.

pub mod commands;
pub mod mutator;
pub mod workspace;

pub use mutator::{AppendJob, GitMutator};
