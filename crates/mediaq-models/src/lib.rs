//! Shared data models for the media processing queue.

pub mod entry;

pub use entry::{EntryKind, MediaEntry};
