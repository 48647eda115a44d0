//! Sync engine for mirroring tabular remote records as local files
//!
//! Records live in remote tables; selected string fields of each record are
//! mirrored as individual files under a per-table directory. This crate
//! implements the engine:
//!
//! - **Naming codec**: encode record fields into file names and decode them
//!   back, via per-table templates (`naming`)
//! - **Ledger**: the persisted document binding tables, formats and tracked
//!   files (`ledger`, `store`)
//! - **Integrity checking**: duplicate-binding detection/removal and
//!   missing-file reporting (`check`)
//! - **Reconciliation**: per-record three-way comparison of file content,
//!   file mtime and remote update time (`reconcile`)
//! - **Orchestration**: bounded fan-out of reconciliation across tables and
//!   records (`orchestrate`)
//! - **Watch bridge**: filesystem events applied as single-field pushes and
//!   entry removals (`watch`)
//!
//! The remote is abstracted behind [`RemoteStore`]; the filesystem behind
//! `tabsync_fs::FileTree`. Neither HTTP transport nor watcher primitives
//! live here.

// A dev-dependency on `tabsync-test-utils` would link a second, non-test
// build of this crate into the unit-test binary, so its `RemoteStore` impl
// would be for a foreign copy of the trait. Compile the helper's source
// into the test build instead; the alias lets its `tabsync_core::` imports
// resolve to this very crate.
#[cfg(test)]
extern crate self as tabsync_core;
#[cfg(test)]
#[path = "../../tabsync-test-utils/src/remote.rs"]
mod test_utils_remote;

pub mod check;
pub mod error;
pub mod ledger;
pub mod naming;
pub mod orchestrate;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod watch;

pub use check::{
    CheckOutcome, MissingReport, Problem, Removal, apply_removal_plan, detect_duplicates,
    detect_missing_files, duplicate_removal_plan, remove_duplicates, run_check,
};
pub use error::{Error, Result};
pub use ledger::{Format, Ledger, LedgerEntry, TableConfig};
pub use naming::{Segment, Template};
pub use orchestrate::{
    RecordFailure, SyncOrchestrator, SyncReport, TableSummary,
};
pub use reconcile::{Binding, Reconciler, RecordSummary, SyncPlan};
pub use remote::{
    FIELD_SYS_ID, FIELD_UPDATED_ON, RemoteRecord, RemoteStore, UpdateOutcome,
    format_remote_timestamp, parse_remote_timestamp,
};
pub use store::{AUTH_FILE_NAME, AuthConfig, LedgerStore, SYNC_FILE_NAME};
pub use watch::{WatchBridge, WatchEvent, WatchOutcome};
