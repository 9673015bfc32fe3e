//! Requests of the service interface and events of the notifier interface.

use std::fmt;

use rdbsync_ipc::{Parcel, ParcelResult, RemoteObjectRef};

use crate::codes::{NotifierCode, RdbServiceCode, NOTIFIER_DESCRIPTOR, SERVICE_DESCRIPTOR};
use crate::option::SyncOption;
use crate::param::RdbSyncerParam;
use crate::predicates::RdbPredicates;
use crate::result::SyncResult;

/// A request to the RdbSync service, one variant per command.
#[derive(Clone)]
pub enum RdbRequest {
    /// Maps `device` and `table` to the distributed table name.
    ObtainTable {
        /// Device (network id) the table lives on.
        device: String,
        /// Local table name.
        table: String,
    },
    /// Registers the caller's notifier.
    InitNotifier {
        /// Store of the caller.
        param: RdbSyncerParam,
        /// The notifier object, absent if the caller failed to create one.
        notifier: Option<RemoteObjectRef>,
    },
    /// Marks tables as distributed.
    SetDistributedTables {
        /// Target store.
        param: RdbSyncerParam,
        /// Table names.
        tables: Vec<String>,
    },
    /// Blocking sync.
    Sync {
        /// Target store.
        param: RdbSyncerParam,
        /// Sync options.
        option: SyncOption,
        /// Rows and devices to sync.
        predicates: RdbPredicates,
    },
    /// Asynchronous sync completed through the notifier.
    Async {
        /// Target store.
        param: RdbSyncerParam,
        /// Client sequence number echoed in the completion.
        seq_num: u32,
        /// Sync options.
        option: SyncOption,
        /// Rows and devices to sync.
        predicates: RdbPredicates,
    },
    /// Subscribes the caller to remote changes.
    Subscribe {
        /// Target store.
        param: RdbSyncerParam,
    },
    /// Cancels the caller's subscription.
    Unsubscribe {
        /// Target store.
        param: RdbSyncerParam,
    },
    /// Runs a query on a remote device.
    RemoteQuery {
        /// Target store.
        param: RdbSyncerParam,
        /// Remote device (network id).
        device: String,
        /// SQL statement.
        sql: String,
        /// Bound arguments.
        selection_args: Vec<String>,
    },
    /// Creates store metadata and the engine store.
    CreateRdbTable {
        /// Target store.
        param: RdbSyncerParam,
        /// Permission required to write.
        write_permission: String,
        /// Permission required to read.
        read_permission: String,
    },
    /// Deletes store metadata.
    DestroyRdbTable {
        /// Target store.
        param: RdbSyncerParam,
    },
}

impl RdbRequest {
    /// The command code of this request.
    pub fn code(&self) -> RdbServiceCode {
        match self {
            Self::ObtainTable { .. } => RdbServiceCode::ObtainTable,
            Self::InitNotifier { .. } => RdbServiceCode::InitNotifier,
            Self::SetDistributedTables { .. } => RdbServiceCode::SetDistTable,
            Self::Sync { .. } => RdbServiceCode::Sync,
            Self::Async { .. } => RdbServiceCode::Async,
            Self::Subscribe { .. } => RdbServiceCode::Subscribe,
            Self::Unsubscribe { .. } => RdbServiceCode::Unsubscribe,
            Self::RemoteQuery { .. } => RdbServiceCode::RemoteQuery,
            Self::CreateRdbTable { .. } => RdbServiceCode::CreateRdbTable,
            Self::DestroyRdbTable { .. } => RdbServiceCode::DestroyRdbTable,
        }
    }

    /// The store parameter, for requests that carry one.
    pub fn param(&self) -> Option<&RdbSyncerParam> {
        match self {
            Self::ObtainTable { .. } => None,
            Self::InitNotifier { param, .. }
            | Self::SetDistributedTables { param, .. }
            | Self::Sync { param, .. }
            | Self::Async { param, .. }
            | Self::Subscribe { param }
            | Self::Unsubscribe { param }
            | Self::RemoteQuery { param, .. }
            | Self::CreateRdbTable { param, .. }
            | Self::DestroyRdbTable { param } => Some(param),
        }
    }

    /// Encodes the interface token followed by the request body.
    pub fn encode(&self) -> ParcelResult<Parcel> {
        let mut parcel = Parcel::new();
        parcel.write_interface_token(SERVICE_DESCRIPTOR)?;
        match self {
            Self::ObtainTable { device, table } => parcel.write(&(device, table))?,
            Self::InitNotifier { param, notifier } => {
                parcel.write(param)?;
                parcel.write_remote_object(notifier.as_ref())?;
            }
            Self::SetDistributedTables { param, tables } => parcel.write(&(param, tables))?,
            Self::Sync {
                param,
                option,
                predicates,
            } => parcel.write(&(param, option, predicates))?,
            Self::Async {
                param,
                seq_num,
                option,
                predicates,
            } => parcel.write(&(param, seq_num, option, predicates))?,
            Self::Subscribe { param } | Self::Unsubscribe { param } | Self::DestroyRdbTable { param } => {
                parcel.write(param)?;
            }
            Self::RemoteQuery {
                param,
                device,
                sql,
                selection_args,
            } => parcel.write(&(param, device, sql, selection_args))?,
            Self::CreateRdbTable {
                param,
                write_permission,
                read_permission,
            } => parcel.write(&(param, write_permission, read_permission))?,
        }
        Ok(parcel)
    }

    /// Decodes a request body. The interface token must already be consumed.
    pub fn decode(code: RdbServiceCode, parcel: &mut Parcel) -> ParcelResult<Self> {
        let request = match code {
            RdbServiceCode::ObtainTable => {
                let (device, table) = parcel.read()?;
                Self::ObtainTable { device, table }
            }
            RdbServiceCode::InitNotifier => Self::InitNotifier {
                param: parcel.read()?,
                notifier: parcel.read_remote_object()?,
            },
            RdbServiceCode::SetDistTable => {
                let (param, tables) = parcel.read()?;
                Self::SetDistributedTables { param, tables }
            }
            RdbServiceCode::Sync => {
                let (param, option, predicates) = parcel.read()?;
                Self::Sync {
                    param,
                    option,
                    predicates,
                }
            }
            RdbServiceCode::Async => {
                let (param, seq_num, option, predicates) = parcel.read()?;
                Self::Async {
                    param,
                    seq_num,
                    option,
                    predicates,
                }
            }
            RdbServiceCode::Subscribe => Self::Subscribe {
                param: parcel.read()?,
            },
            RdbServiceCode::Unsubscribe => Self::Unsubscribe {
                param: parcel.read()?,
            },
            RdbServiceCode::RemoteQuery => {
                let (param, device, sql, selection_args) = parcel.read()?;
                Self::RemoteQuery {
                    param,
                    device,
                    sql,
                    selection_args,
                }
            }
            RdbServiceCode::CreateRdbTable => {
                let (param, write_permission, read_permission) = parcel.read()?;
                Self::CreateRdbTable {
                    param,
                    write_permission,
                    read_permission,
                }
            }
            RdbServiceCode::DestroyRdbTable => Self::DestroyRdbTable {
                param: parcel.read()?,
            },
        };
        Ok(request)
    }
}

impl fmt::Debug for RdbRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("RdbRequest");
        out.field("code", &self.code());
        if let Some(param) = self.param() {
            out.field("bundle", &param.bundle_name)
                .field("store", &param.store_name);
        }
        out.finish()
    }
}

/// An event delivered to a client notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEvent {
    /// An asynchronous sync finished.
    SyncComplete {
        /// Sequence number of the originating request.
        seq_num: u32,
        /// Per-device outcome.
        result: SyncResult,
    },
    /// Remote data of a store changed.
    DataChange {
        /// Store name as registered by the client.
        store_name: String,
        /// Devices (network ids) the change came from.
        devices: Vec<String>,
    },
}

impl NotifierEvent {
    /// The command code of this event.
    pub fn code(&self) -> NotifierCode {
        match self {
            Self::SyncComplete { .. } => NotifierCode::SyncComplete,
            Self::DataChange { .. } => NotifierCode::DataChange,
        }
    }

    /// Encodes the interface token followed by the event body.
    pub fn encode(&self) -> ParcelResult<Parcel> {
        let mut parcel = Parcel::new();
        parcel.write_interface_token(NOTIFIER_DESCRIPTOR)?;
        match self {
            Self::SyncComplete { seq_num, result } => parcel.write(&(seq_num, result))?,
            Self::DataChange {
                store_name,
                devices,
            } => parcel.write(&(store_name, devices))?,
        }
        Ok(parcel)
    }

    /// Decodes an event body. The interface token must already be consumed.
    pub fn decode(code: NotifierCode, parcel: &mut Parcel) -> ParcelResult<Self> {
        Ok(match code {
            NotifierCode::SyncComplete => {
                let (seq_num, result) = parcel.read()?;
                Self::SyncComplete { seq_num, result }
            }
            NotifierCode::DataChange => {
                let (store_name, devices) = parcel.read()?;
                Self::DataChange {
                    store_name,
                    devices,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::SyncMode;

    fn decode_request(request: &RdbRequest) -> RdbRequest {
        let mut parcel = request.encode().unwrap();
        parcel.enforce_interface(SERVICE_DESCRIPTOR).unwrap();
        let decoded = RdbRequest::decode(request.code(), &mut parcel).unwrap();
        assert_eq!(parcel.remaining(), 0);
        decoded
    }

    #[test]
    fn async_request() {
        let request = RdbRequest::Async {
            param: RdbSyncerParam::new("com.example", "notes.db"),
            seq_num: 41,
            option: SyncOption::asynchronous(SyncMode::Pull),
            predicates: RdbPredicates::new("notes").equal_to("id", "1"),
        };
        match decode_request(&request) {
            RdbRequest::Async {
                param,
                seq_num,
                option,
                predicates,
            } => {
                assert_eq!(param.store_id(), "notes");
                assert_eq!(seq_num, 41);
                assert_eq!(option.mode, SyncMode::Pull);
                assert_eq!(predicates.operations.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn init_notifier_without_object() {
        let request = RdbRequest::InitNotifier {
            param: RdbSyncerParam::new("b", "s.db"),
            notifier: None,
        };
        match decode_request(&request) {
            RdbRequest::InitNotifier { notifier, .. } => assert!(notifier.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn remote_query_request() {
        let request = RdbRequest::RemoteQuery {
            param: RdbSyncerParam::new("b", "s.db"),
            device: "net-1".into(),
            sql: "SELECT * FROM t WHERE id = ?".into(),
            selection_args: vec!["3".into()],
        };
        match decode_request(&request) {
            RdbRequest::RemoteQuery {
                device,
                selection_args,
                ..
            } => {
                assert_eq!(device, "net-1");
                assert_eq!(selection_args, vec!["3"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_request_fails() {
        let request = RdbRequest::Sync {
            param: RdbSyncerParam::new("b", "s.db"),
            option: SyncOption::default(),
            predicates: RdbPredicates::new("t"),
        };
        let encoded = request.encode().unwrap();
        let bytes = &encoded.as_bytes()[..encoded.len() - 2];
        let mut parcel = Parcel::from_bytes(bytes).unwrap();
        parcel.enforce_interface(SERVICE_DESCRIPTOR).unwrap();
        assert!(RdbRequest::decode(RdbServiceCode::Sync, &mut parcel).is_err());
    }

    #[test]
    fn debug_omits_password() {
        let request = RdbRequest::Subscribe {
            param: RdbSyncerParam::new("b", "s.db").with_password(b"pw".to_vec()),
        };
        let text = format!("{request:?}");
        assert!(text.contains("Subscribe"));
        assert!(!text.contains("pw"));
    }

    #[test]
    fn notifier_events() {
        for event in [
            NotifierEvent::SyncComplete {
                seq_num: 7,
                result: [("peer", 0)].into_iter().collect(),
            },
            NotifierEvent::DataChange {
                store_name: "notes".into(),
                devices: vec!["net-1".into()],
            },
        ] {
            let mut parcel = event.encode().unwrap();
            parcel.enforce_interface(NOTIFIER_DESCRIPTOR).unwrap();
            assert_eq!(NotifierEvent::decode(event.code(), &mut parcel).unwrap(), event);
        }
    }
}
