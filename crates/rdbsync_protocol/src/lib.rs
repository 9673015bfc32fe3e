//! # RdbSync Protocol
//!
//! Value types exchanged between relational-store clients and the RdbSync
//! service, and their parcel marshalling.
//!
//! This crate provides:
//! - [`RdbSyncerParam`] identifying a store
//! - [`RdbPredicates`], an ordered list of filter operations
//! - [`SyncOption`], [`SyncResult`] and [`SubscribeOption`]
//! - [`RdbStatus`] and the command codes of each interface
//! - [`RdbRequest`] and [`NotifierEvent`], one variant per command
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codes;
mod messages;
mod option;
mod param;
mod predicates;
mod result;
mod status;

pub use codes::{
    NotifierCode, RdbServiceCode, ResultSetCode, NOTIFIER_DESCRIPTOR, RESULT_SET_DESCRIPTOR,
    SERVICE_DESCRIPTOR,
};
pub use messages::{NotifierEvent, RdbRequest};
pub use option::{SubscribeMode, SubscribeOption, SyncMode, SyncOption};
pub use param::{remove_suffix, RdbSyncerParam};
pub use predicates::{PredicateOperator, RdbPredicateOperation, RdbPredicates, OPERATOR_MAX};
pub use result::SyncResult;
pub use status::RdbStatus;
