//! Interface descriptors and command codes.

/// Descriptor of the RdbSync service interface.
pub const SERVICE_DESCRIPTOR: &str = "rdbsync.IRdbService";

/// Descriptor of the client notifier interface.
pub const NOTIFIER_DESCRIPTOR: &str = "rdbsync.IRdbNotifier";

/// Descriptor of the remote result-set interface.
pub const RESULT_SET_DESCRIPTOR: &str = "rdbsync.IResultSet";

macro_rules! command_codes {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl $name {
            /// Wire code of this command.
            pub fn code(self) -> u32 {
                self as u32
            }

            /// Maps a wire code, or `None` if it is unknown.
            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

command_codes! {
    /// Commands of the service interface.
    RdbServiceCode {
        /// Maps a device and table to the distributed table name.
        ObtainTable = 0,
        /// Registers the caller's notifier object.
        InitNotifier = 1,
        /// Marks tables as distributed.
        SetDistTable = 2,
        /// Blocking sync.
        Sync = 3,
        /// Asynchronous sync.
        Async = 4,
        /// Subscribes to remote changes.
        Subscribe = 5,
        /// Cancels a subscription.
        Unsubscribe = 6,
        /// Runs a query on a remote device.
        RemoteQuery = 7,
        /// Creates store metadata and the engine store.
        CreateRdbTable = 8,
        /// Deletes store metadata.
        DestroyRdbTable = 9,
    }
}

command_codes! {
    /// Commands of the notifier interface.
    NotifierCode {
        /// An asynchronous sync finished.
        SyncComplete = 0,
        /// Remote data changed.
        DataChange = 1,
    }
}

command_codes! {
    /// Commands of the remote result-set interface.
    ResultSetCode {
        /// Column names.
        GetAllColumnNames = 0,
        /// Column count.
        GetColumnCount = 1,
        /// Column type of the current row.
        GetColumnType = 2,
        /// Index of a named column.
        GetColumnIndex = 3,
        /// Row count.
        GetRowCount = 4,
        /// Current row position.
        GetRowIndex = 5,
        /// Moves by a relative offset.
        GoTo = 6,
        /// Moves to an absolute row.
        GoToRow = 7,
        /// Reads a text column.
        GetString = 8,
        /// Reads an integer column.
        GetLong = 9,
        /// Reads a blob column.
        GetBlob = 10,
        /// Checks for null.
        IsNull = 11,
        /// Releases the result set.
        Close = 12,
    }
}
