//! Client handle to a result set living in the service.

use rdbsync_ipc::{MessageOption, Parcel, ParcelResult, RemoteObjectRef};
use rdbsync_protocol::{ResultSetCode, RESULT_SET_DESCRIPTOR};

use crate::error::{ClientError, ClientResult};

/// Rows returned by a remote query.
///
/// Every call is a round trip. A non-zero engine status is returned as
/// [`ClientError::ResultSet`].
pub struct ResultSetProxy {
    remote: RemoteObjectRef,
}

impl ResultSetProxy {
    /// Wraps the result-set object from a remote query reply.
    pub fn new(remote: RemoteObjectRef) -> Self {
        Self { remote }
    }

    /// Column names.
    pub fn column_names(&self) -> ClientResult<Vec<String>> {
        Ok(self.call(ResultSetCode::GetAllColumnNames, |_| Ok(()))?.read_string_vec()?)
    }

    /// Number of columns.
    pub fn column_count(&self) -> ClientResult<i32> {
        Ok(self.call(ResultSetCode::GetColumnCount, |_| Ok(()))?.read_i32()?)
    }

    /// Raw storage-class code of `column` in the current row.
    pub fn column_type(&self, column: i32) -> ClientResult<i32> {
        Ok(self
            .call(ResultSetCode::GetColumnType, |data| data.write_i32(column))?
            .read_i32()?)
    }

    /// Index of the column called `name`.
    pub fn column_index(&self, name: &str) -> ClientResult<i32> {
        Ok(self
            .call(ResultSetCode::GetColumnIndex, |data| data.write_string(name))?
            .read_i32()?)
    }

    /// Number of rows.
    pub fn row_count(&self) -> ClientResult<i32> {
        Ok(self.call(ResultSetCode::GetRowCount, |_| Ok(()))?.read_i32()?)
    }

    /// Current row, `-1` before the first.
    pub fn row_index(&self) -> ClientResult<i32> {
        Ok(self.call(ResultSetCode::GetRowIndex, |_| Ok(()))?.read_i32()?)
    }

    /// Moves the cursor by `offset` rows.
    pub fn go_to(&self, offset: i32) -> ClientResult<()> {
        self.call(ResultSetCode::GoTo, |data| data.write_i32(offset))?;
        Ok(())
    }

    /// Moves the cursor to `row`.
    pub fn go_to_row(&self, row: i32) -> ClientResult<()> {
        self.call(ResultSetCode::GoToRow, |data| data.write_i32(row))?;
        Ok(())
    }

    /// Text value of `column`.
    pub fn get_string(&self, column: i32) -> ClientResult<String> {
        Ok(self
            .call(ResultSetCode::GetString, |data| data.write_i32(column))?
            .read_string()?)
    }

    /// Integer value of `column`.
    pub fn get_long(&self, column: i32) -> ClientResult<i64> {
        Ok(self
            .call(ResultSetCode::GetLong, |data| data.write_i32(column))?
            .read_i64()?)
    }

    /// Blob value of `column`.
    pub fn get_blob(&self, column: i32) -> ClientResult<Vec<u8>> {
        Ok(self
            .call(ResultSetCode::GetBlob, |data| data.write_i32(column))?
            .read_bytes()?)
    }

    /// Returns true if `column` is `NULL`.
    pub fn is_null(&self, column: i32) -> ClientResult<bool> {
        Ok(self
            .call(ResultSetCode::IsNull, |data| data.write_i32(column))?
            .read_bool()?)
    }

    /// Releases the result set in the service.
    pub fn close(&self) -> ClientResult<()> {
        self.call(ResultSetCode::Close, |_| Ok(()))?;
        Ok(())
    }

    fn call(
        &self,
        code: ResultSetCode,
        args: impl FnOnce(&mut Parcel) -> ParcelResult<()>,
    ) -> ClientResult<Parcel> {
        let mut data = Parcel::new();
        data.write_interface_token(RESULT_SET_DESCRIPTOR)?;
        args(&mut data)?;
        let mut reply = self
            .remote
            .send_request(code.code(), data, MessageOption::Sync)?;
        match reply.read_i32()? {
            0 => Ok(reply),
            status => Err(ClientError::ResultSet(status)),
        }
    }
}

impl std::fmt::Debug for ResultSetProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSetProxy")
            .field("alive", &self.remote.is_alive())
            .finish()
    }
}
