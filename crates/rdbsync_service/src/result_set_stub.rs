//! Serves an engine result set to a remote client.
//!
//! Every reply starts with the engine status code (`0` on success),
//! followed by the value when the call succeeded.

use parking_lot::Mutex;
use rdbsync_ipc::{
    CallingIdentity, Parcel, ParcelResult, RemoteStub, ERR_INTERFACE_TOKEN, ERR_INVALID_DATA,
    ERR_UNKNOWN_CODE,
};
use rdbsync_protocol::{ResultSetCode, RESULT_SET_DESCRIPTOR};
use rdbsync_store::{DbStatus, ResultSet, StoreError, StoreResult};
use tracing::{debug, warn};

/// Stub over one result set.
pub struct RdbResultSetStub {
    result_set: Mutex<Box<dyn ResultSet>>,
}

impl RdbResultSetStub {
    /// Wraps `result_set`.
    pub fn new(result_set: Box<dyn ResultSet>) -> Self {
        Self {
            result_set: Mutex::new(result_set),
        }
    }

    fn handle(&self, code: ResultSetCode, data: &mut Parcel, reply: &mut Parcel) -> ParcelResult<()> {
        let mut result_set = self.result_set.lock();
        match code {
            ResultSetCode::GetAllColumnNames => {
                write_value(reply, result_set.column_names(), |reply, names| {
                    reply.write_string_vec(&names)
                })
            }
            ResultSetCode::GetColumnCount => write_value(reply, result_set.column_count(), |reply, count| {
                reply.write_i32(clamp(count))
            }),
            ResultSetCode::GetColumnType => {
                let column = column(data.read_i32()?);
                let value = column.and_then(|column| result_set.column_type(column));
                write_value(reply, value, |reply, kind| reply.write_i32(kind.code()))
            }
            ResultSetCode::GetColumnIndex => {
                let name = data.read_string()?;
                write_value(reply, result_set.column_index(&name), |reply, index| {
                    reply.write_i32(clamp(index))
                })
            }
            ResultSetCode::GetRowCount => write_value(reply, result_set.row_count(), |reply, count| {
                reply.write_i32(clamp(count))
            }),
            ResultSetCode::GetRowIndex => {
                write_value(reply, result_set.row_index(), |reply, index| reply.write_i32(index))
            }
            ResultSetCode::GoTo => {
                let offset = data.read_i32()?;
                write_value(reply, result_set.go_to(offset), |_, ()| Ok(()))
            }
            ResultSetCode::GoToRow => {
                let row = data.read_i32()?;
                write_value(reply, result_set.go_to_row(row), |_, ()| Ok(()))
            }
            ResultSetCode::GetString => {
                let value = column(data.read_i32()?).and_then(|column| result_set.get_string(column));
                write_value(reply, value, |reply, text| reply.write_string(&text))
            }
            ResultSetCode::GetLong => {
                let value = column(data.read_i32()?).and_then(|column| result_set.get_long(column));
                write_value(reply, value, |reply, number| reply.write_i64(number))
            }
            ResultSetCode::GetBlob => {
                let value = column(data.read_i32()?).and_then(|column| result_set.get_blob(column));
                write_value(reply, value, |reply, bytes| reply.write_bytes(&bytes))
            }
            ResultSetCode::IsNull => {
                let value = column(data.read_i32()?).and_then(|column| result_set.is_null(column));
                write_value(reply, value, |reply, null| reply.write_bool(null))
            }
            ResultSetCode::Close => {
                debug!("remote result set closed");
                write_value(reply, result_set.close(), |_, ()| Ok(()))
            }
        }
    }
}

impl RemoteStub for RdbResultSetStub {
    fn descriptor(&self) -> &str {
        RESULT_SET_DESCRIPTOR
    }

    fn on_remote_request(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        _caller: &CallingIdentity,
    ) -> i32 {
        if data.enforce_interface(RESULT_SET_DESCRIPTOR).is_err() {
            warn!(code, "result set request with bad interface token");
            return ERR_INTERFACE_TOKEN;
        }
        let Some(code) = ResultSetCode::from_code(code) else {
            warn!(code, "unknown result set command");
            return ERR_UNKNOWN_CODE;
        };
        match self.handle(code, data, reply) {
            Ok(()) => 0,
            Err(err) => {
                warn!(?code, error = %err, "malformed result set request");
                ERR_INVALID_DATA
            }
        }
    }
}

fn column(index: i32) -> StoreResult<usize> {
    usize::try_from(index).map_err(|_| StoreError::Engine(DbStatus::InvalidArgs))
}

fn clamp(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn write_value<T>(
    reply: &mut Parcel,
    value: StoreResult<T>,
    write: impl FnOnce(&mut Parcel, T) -> ParcelResult<()>,
) -> ParcelResult<()> {
    match value {
        Ok(value) => {
            reply.write_i32(DbStatus::Ok.code())?;
            write(reply, value)
        }
        Err(err) => reply.write_i32(err.db_status().code()),
    }
}
