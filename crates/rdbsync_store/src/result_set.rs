//! Cursor over rows returned by a remote query.

use crate::error::{StoreError, StoreResult};

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

/// Storage class of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ColumnType {
    /// `NULL`.
    Null = 0,
    /// Integer.
    Integer = 1,
    /// Text.
    Text = 3,
    /// Blob.
    Blob = 4,
}

impl ColumnType {
    /// Numeric code of this type.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Null),
            1 => Some(Self::Integer),
            3 => Some(Self::Text),
            4 => Some(Self::Blob),
            _ => None,
        }
    }
}

impl ColumnValue {
    /// Storage class of this value.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Null => ColumnType::Null,
            Self::Integer(_) => ColumnType::Integer,
            Self::Text(_) => ColumnType::Text,
            Self::Blob(_) => ColumnType::Blob,
        }
    }
}

/// A forward and random-access cursor over query rows.
///
/// The cursor starts before the first row (index `-1`).
pub trait ResultSet: Send {
    /// Column names in result order.
    fn column_names(&self) -> StoreResult<Vec<String>>;

    /// Number of rows.
    fn row_count(&self) -> StoreResult<usize>;

    /// Current row index, `-1` before the first row.
    fn row_index(&self) -> StoreResult<i32>;

    /// Moves to an absolute row.
    fn go_to_row(&mut self, row: i32) -> StoreResult<()>;

    /// Value of `column` in the current row.
    fn get(&self, column: usize) -> StoreResult<ColumnValue>;

    /// Releases the cursor. Later calls fail with [`StoreError::Closed`].
    fn close(&mut self) -> StoreResult<()>;

    /// Number of columns.
    fn column_count(&self) -> StoreResult<usize> {
        Ok(self.column_names()?.len())
    }

    /// Index of the named column.
    fn column_index(&self, name: &str) -> StoreResult<usize> {
        self.column_names()?
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| StoreError::invalid_argument(format!("no column named {name}")))
    }

    /// Moves by `offset` rows relative to the current one.
    fn go_to(&mut self, offset: i32) -> StoreResult<()> {
        let target = self
            .row_index()?
            .checked_add(offset)
            .ok_or_else(|| StoreError::invalid_argument("row offset overflow"))?;
        self.go_to_row(target)
    }

    /// Moves to the first row.
    fn go_to_first_row(&mut self) -> StoreResult<()> {
        self.go_to_row(0)
    }

    /// Moves to the next row.
    fn go_to_next_row(&mut self) -> StoreResult<()> {
        self.go_to(1)
    }

    /// Storage class of `column` in the current row.
    fn column_type(&self, column: usize) -> StoreResult<ColumnType> {
        Ok(self.get(column)?.column_type())
    }

    /// Returns true if `column` in the current row is `NULL`.
    fn is_null(&self, column: usize) -> StoreResult<bool> {
        Ok(matches!(self.get(column)?, ColumnValue::Null))
    }

    /// Text value of `column`; integers are formatted.
    fn get_string(&self, column: usize) -> StoreResult<String> {
        match self.get(column)? {
            ColumnValue::Text(text) => Ok(text),
            ColumnValue::Integer(value) => Ok(value.to_string()),
            ColumnValue::Null => Ok(String::new()),
            ColumnValue::Blob(_) => Err(StoreError::invalid_argument("blob is not text")),
        }
    }

    /// Integer value of `column`; numeric text is parsed.
    fn get_long(&self, column: usize) -> StoreResult<i64> {
        match self.get(column)? {
            ColumnValue::Integer(value) => Ok(value),
            ColumnValue::Null => Ok(0),
            ColumnValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| StoreError::invalid_argument(format!("{text:?} is not an integer"))),
            ColumnValue::Blob(_) => Err(StoreError::invalid_argument("blob is not an integer")),
        }
    }

    /// Blob value of `column`; text is returned as its bytes.
    fn get_blob(&self, column: usize) -> StoreResult<Vec<u8>> {
        match self.get(column)? {
            ColumnValue::Blob(bytes) => Ok(bytes),
            ColumnValue::Text(text) => Ok(text.into_bytes()),
            ColumnValue::Null => Ok(Vec::new()),
            ColumnValue::Integer(_) => Err(StoreError::invalid_argument("integer is not a blob")),
        }
    }
}

/// In-memory [`ResultSet`].
#[derive(Debug, Clone)]
pub struct MemoryResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<ColumnValue>>,
    position: i32,
    closed: bool,
}

impl MemoryResultSet {
    /// Creates a result set; every row must have one value per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<ColumnValue>>) -> StoreResult<Self> {
        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(StoreError::invalid_argument(format!(
                "row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        if i32::try_from(rows.len()).is_err() {
            return Err(StoreError::invalid_argument("too many rows"));
        }
        Ok(Self {
            columns,
            rows,
            position: -1,
            closed: false,
        })
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl ResultSet for MemoryResultSet {
    fn column_names(&self) -> StoreResult<Vec<String>> {
        self.check_open()?;
        Ok(self.columns.clone())
    }

    fn row_count(&self) -> StoreResult<usize> {
        self.check_open()?;
        Ok(self.rows.len())
    }

    fn row_index(&self) -> StoreResult<i32> {
        self.check_open()?;
        Ok(self.position)
    }

    fn go_to_row(&mut self, row: i32) -> StoreResult<()> {
        self.check_open()?;
        let valid = usize::try_from(row).is_ok_and(|index| index < self.rows.len());
        if !valid {
            return Err(StoreError::invalid_argument(format!("row {row} out of range")));
        }
        self.position = row;
        Ok(())
    }

    fn get(&self, column: usize) -> StoreResult<ColumnValue> {
        self.check_open()?;
        let row = usize::try_from(self.position)
            .ok()
            .and_then(|index| self.rows.get(index))
            .ok_or_else(|| StoreError::invalid_argument("cursor is not on a row"))?;
        row.get(column)
            .cloned()
            .ok_or_else(|| StoreError::invalid_argument(format!("column {column} out of range")))
    }

    fn close(&mut self) -> StoreResult<()> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}
