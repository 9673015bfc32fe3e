//! # rdbsync_client
//!
//! Application side of RdbSync.
//!
//! [`RdbServiceProxy`] encodes requests for the service, owns the process's
//! notifier object and routes sync completions and store changes back to
//! the callbacks and [`RdbStoreObserver`]s registered with it. Remote query
//! results are read through [`ResultSetProxy`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod notifier_stub;
mod observer;
mod proxy;
mod result_set;

pub use error::{ClientError, ClientResult};
pub use notifier_stub::{ChangeHandler, CompleteHandler, RdbNotifierStub};
pub use observer::{ObserverEntry, RdbStoreObserver};
pub use proxy::{RdbServiceProxy, SyncCallback};
pub use result_set::ResultSetProxy;
