//! Test utilities shared across crate-level unit tests.

pub mod scripted;
pub mod wait;

pub use scripted::ScriptedStore;
pub use wait::wait_for;
