//! # rdbsync_store
//!
//! Collaborators of the RdbSync service: the relational storage engine,
//! the metadata manager, the device manager and password crypto.
//!
//! Each collaborator is a trait with a reference implementation:
//!
//! | Interface | Implementation |
//! |---|---|
//! | [`RelationalStoreManager`] / [`RelationalStoreDelegate`] | [`MemoryStoreManager`] |
//! | [`MetaStore`] | [`MemoryMetaStore`], [`FileMetaStore`] |
//! | [`DeviceManager`] | [`StaticDeviceManager`] |
//! | [`ResultSet`] | [`MemoryResultSet`] |
//!
//! ```
//! use rdbsync_store::{distributed_table_name, store_identifier};
//!
//! let id = store_identifier("100", "app", "notes");
//! assert_eq!(id.len(), 32);
//! assert!(distributed_table_name("uuid", "employee").starts_with("naturalbase_rdb_aux_employee_"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crypto;
mod delegate;
mod device;
mod error;
mod memory;
mod meta;
mod query;
mod result_set;

pub use crypto::{CipherPassword, CryptoManager, EncryptionKey, KEY_SIZE, MAX_PASSWORD_LEN};
pub use delegate::{
    distributed_table_name, store_identifier, AutoLaunchParam, AutoLaunchRequestCallback,
    CipherType, DeviceSyncStatus, RelationalStoreDelegate, RelationalStoreManager,
    StoreChangedData, StoreObserver, StoreOption, StoreProperty, SyncMode, SyncStatusCallback,
    TableStatus, DISTRIBUTED_TABLE_PREFIX,
};
pub use device::{
    anonymize, DeviceChange, DeviceInfo, DeviceManager, DeviceObserver, StaticDeviceManager,
};
pub use error::{DbStatus, StoreError, StoreResult};
pub use memory::{CompletionMode, MemoryStoreManager, OpenRecord, RemoteQueryCall, SyncCall};
pub use meta::{
    AppIdMetaData, FileMetaStore, MemoryMetaStore, MetaAction, MetaCallback, MetaDataManager,
    MetaStore, SecretKeyMetaData, StoreMetaData, KEY_SEPARATOR, STORE_TYPE_DEVICE_COLLABORATION,
};
pub use query::{Query, QueryClause};
pub use result_set::{ColumnType, ColumnValue, MemoryResultSet, ResultSet};
