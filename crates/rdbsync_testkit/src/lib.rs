//! # RdbSync Testkit
//!
//! Test utilities for RdbSync.
//!
//! This crate provides:
//! - A [`TestBed`] running the service over the in-memory engine, with
//!   [`TestClient`]s connected through in-process IPC handles
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rdbsync_testkit::prelude::*;
//!
//! #[test]
//! fn sync_reaches_peers() {
//!     let bed = TestBed::new();
//!     let client = bed.client(100);
//!     let result = client
//!         .proxy
//!         .do_sync(&test_param("notes.db"), &SyncOption::blocking(SyncMode::Push), &RdbPredicates::new("notes"))
//!         .unwrap();
//!     assert!(result.all_succeeded());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use rdbsync_protocol::{RdbPredicates, RdbSyncerParam, SyncMode, SyncOption, SyncResult};
}

pub use fixtures::*;
pub use generators::*;
