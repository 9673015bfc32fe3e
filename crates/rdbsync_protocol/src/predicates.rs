//! Ordered filter operations describing which rows to sync.

use rdbsync_ipc::{Marshal, Parcel, ParcelError, ParcelResult, Unmarshal};

/// Operator codes at or above this value are not defined.
pub const OPERATOR_MAX: i32 = 6;

/// A predicate operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PredicateOperator {
    /// `field = value`
    EqualTo = 0,
    /// `field != value`
    NotEqualTo = 1,
    /// Conjunction of the surrounding clauses.
    And = 2,
    /// Disjunction of the surrounding clauses.
    Or = 3,
    /// Sort by `field`; the single value is `"true"` for ascending.
    OrderBy = 4,
    /// Row limit in `field`, offset in the single value.
    Limit = 5,
}

impl PredicateOperator {
    /// Wire code of this operator.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a wire code, or `None` if it is outside `0..OPERATOR_MAX`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::EqualTo),
            1 => Some(Self::NotEqualTo),
            2 => Some(Self::And),
            3 => Some(Self::Or),
            4 => Some(Self::OrderBy),
            5 => Some(Self::Limit),
            _ => None,
        }
    }
}

/// One filter operation.
///
/// The operator is kept as its raw code so that a request carrying an
/// unknown operator survives decoding and can be rejected by the service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RdbPredicateOperation {
    /// Raw operator code.
    pub operator: i32,
    /// Field name, or the limit for [`PredicateOperator::Limit`].
    pub field: String,
    /// Operand values.
    pub values: Vec<String>,
}

impl RdbPredicateOperation {
    /// Creates an operation with a known operator.
    pub fn new(operator: PredicateOperator, field: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            operator: operator.code(),
            field: field.into(),
            values,
        }
    }

    /// The decoded operator, if known.
    pub fn known_operator(&self) -> Option<PredicateOperator> {
        PredicateOperator::from_code(self.operator)
    }
}

impl Marshal for RdbPredicateOperation {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        parcel.write_i32(self.operator)?;
        parcel.write_string(&self.field)?;
        parcel.write_string_vec(self.values.as_slice())
    }
}

impl Unmarshal for RdbPredicateOperation {
    fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
        Ok(Self {
            operator: parcel.read_i32()?,
            field: parcel.read_string()?,
            values: parcel.read_string_vec()?,
        })
    }
}

/// A table, a device filter and ordered operations.
///
/// Builder methods append in call order and never reorder or deduplicate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RdbPredicates {
    /// Table to sync.
    pub table: String,
    /// Devices to sync with; empty means every online device.
    pub devices: Vec<String>,
    /// Operations in application order.
    pub operations: Vec<RdbPredicateOperation>,
}

impl RdbPredicates {
    /// Creates predicates over `table` with no operations.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            devices: Vec::new(),
            operations: Vec::new(),
        }
    }

    /// Restricts the sync to the given devices.
    #[must_use]
    pub fn in_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices.extend(devices.into_iter().map(Into::into));
        self
    }

    /// Clears any device restriction.
    #[must_use]
    pub fn in_all_devices(mut self) -> Self {
        self.devices.clear();
        self
    }

    /// Appends `field = value`.
    #[must_use]
    pub fn equal_to(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(PredicateOperator::EqualTo, field.into(), vec![value.into()])
    }

    /// Appends `field != value`.
    #[must_use]
    pub fn not_equal_to(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(PredicateOperator::NotEqualTo, field.into(), vec![value.into()])
    }

    /// Appends a conjunction.
    #[must_use]
    pub fn and(self) -> Self {
        self.push(PredicateOperator::And, String::new(), Vec::new())
    }

    /// Appends a disjunction.
    #[must_use]
    pub fn or(self) -> Self {
        self.push(PredicateOperator::Or, String::new(), Vec::new())
    }

    /// Appends an ordering on `field`.
    #[must_use]
    pub fn order_by(self, field: impl Into<String>, ascending: bool) -> Self {
        self.push(PredicateOperator::OrderBy, field.into(), vec![ascending.to_string()])
    }

    /// Appends a limit and offset.
    #[must_use]
    pub fn limit(self, limit: i32, offset: i32) -> Self {
        self.push(PredicateOperator::Limit, limit.to_string(), vec![offset.to_string()])
    }

    /// Appends an operation verbatim, including unknown operator codes.
    #[must_use]
    pub fn with_operation(mut self, operation: RdbPredicateOperation) -> Self {
        self.operations.push(operation);
        self
    }

    fn push(mut self, operator: PredicateOperator, field: String, values: Vec<String>) -> Self {
        self.operations
            .push(RdbPredicateOperation::new(operator, field, values));
        self
    }
}

impl Marshal for RdbPredicates {
    fn marshal(&self, parcel: &mut Parcel) -> ParcelResult<()> {
        parcel.write_string(&self.table)?;
        parcel.write_string_vec(self.devices.as_slice())?;
        let count = u32::try_from(self.operations.len())
            .map_err(|_| ParcelError::invalid_value("too many predicate operations"))?;
        parcel.write_u32(count)?;
        for operation in &self.operations {
            operation.marshal(parcel)?;
        }
        Ok(())
    }
}

impl Unmarshal for RdbPredicates {
    fn unmarshal(parcel: &mut Parcel) -> ParcelResult<Self> {
        let table = parcel.read_string()?;
        let devices = parcel.read_string_vec()?;
        let count = parcel.read_u32()?;
        // every operation takes at least three bytes
        if u64::from(count) * 3 > parcel.remaining() as u64 {
            return Err(ParcelError::SizeLimitExceeded {
                claimed: u64::from(count),
                max_allowed: parcel.remaining() as u64 / 3,
            });
        }
        let mut operations = Vec::with_capacity(count as usize);
        for _ in 0..count {
            operations.push(RdbPredicateOperation::unmarshal(parcel)?);
        }
        Ok(Self {
            table,
            devices,
            operations,
        })
    }
}
