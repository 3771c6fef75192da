//! In-memory collaborators and graph fixtures shared by the Flowbot test suites.

pub mod delegate;
pub mod fixtures;
pub mod stores;

pub use delegate::ScriptedDelegate;
pub use stores::{ContendedSessionStore, MemoryFlowRepository, MemorySessionStore};
