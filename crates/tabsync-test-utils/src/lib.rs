//! Shared test utilities for the tabsync workspace.
//!
//! This crate provides standardised test fixtures to eliminate duplication
//! across crate test suites. It is a dev-dependency only — never published.
//!
//! # Modules
//!
//! - [`remote`] — in-memory [`tabsync_core::RemoteStore`] with scriptable
//!   failures and an update log

pub mod remote;

pub use remote::{MemoryRemote, RecordUpdate};
