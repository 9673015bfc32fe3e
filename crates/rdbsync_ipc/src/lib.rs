//! # RdbSync IPC
//!
//! IPC runtime primitives shared by the RdbSync service and its clients.
//!
//! This crate provides:
//! - [`Parcel`], an ordered typed message buffer framed as a sequence of
//!   canonical CBOR items
//! - [`Marshal`] / [`Unmarshal`] for protocol types
//! - [`RemoteObject`] and [`RemoteStub`], the proxy/stub seam
//! - [`LocalObject`], an in-process transport that routes requests straight
//!   into a stub
//! - Peer liveness events ([`PeerEvent`], [`DeathWatcher`])
//! - Thread-safe containers used on both sides of the boundary
//!   ([`ConcurrentMap`], [`LruBucket`])
//!
//! ## Usage
//!
//! ```
//! use rdbsync_ipc::Parcel;
//!
//! let mut parcel = Parcel::new();
//! parcel.write_string("store.db").unwrap();
//! parcel.write_i32(-7).unwrap();
//!
//! assert_eq!(parcel.read_string().unwrap(), "store.db");
//! assert_eq!(parcel.read_i32().unwrap(), -7);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod concurrent;
mod error;
mod liveness;
mod lru_bucket;
mod parcel;
mod remote;
mod wire;

pub use concurrent::ConcurrentMap;
pub use error::{IpcError, IpcResult, ParcelError, ParcelResult};
pub use liveness::{peer_event_channel, DeathWatcher, PeerEvent, PeerEventReceiver, PeerEventSender};
pub use lru_bucket::LruBucket;
pub use parcel::{Marshal, Parcel, Unmarshal, MAX_PARCEL_SIZE};
pub use remote::{
    CallingIdentity, LocalObject, MessageOption, RemoteObject, RemoteObjectRef, RemoteStub,
    ERR_INTERFACE_TOKEN, ERR_INVALID_DATA, ERR_UNKNOWN_CODE,
};
