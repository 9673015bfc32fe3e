//! Engine-native sync query.

use std::fmt;

/// One clause of a [`Query`], applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryClause {
    /// `field = value`
    EqualTo {
        /// Column name.
        field: String,
        /// Operand.
        value: String,
    },
    /// `field != value`
    NotEqualTo {
        /// Column name.
        field: String,
        /// Operand.
        value: String,
    },
    /// Conjunction.
    And,
    /// Disjunction.
    Or,
    /// Ordering.
    OrderBy {
        /// Column name.
        field: String,
        /// Ascending when true.
        ascending: bool,
    },
    /// Row window.
    Limit {
        /// Maximum number of rows.
        limit: i32,
        /// Rows to skip.
        offset: i32,
    },
}

/// A query selecting the rows of one table to sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    clauses: Vec<QueryClause>,
}

impl Query {
    /// Selects every row of `table`.
    pub fn select(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            clauses: Vec::new(),
        }
    }

    /// Appends `field = value`.
    pub fn equal_to(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.clauses.push(QueryClause::EqualTo {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Appends `field != value`.
    pub fn not_equal_to(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.clauses.push(QueryClause::NotEqualTo {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Appends a conjunction.
    pub fn and(&mut self) -> &mut Self {
        self.clauses.push(QueryClause::And);
        self
    }

    /// Appends a disjunction.
    pub fn or(&mut self) -> &mut Self {
        self.clauses.push(QueryClause::Or);
        self
    }

    /// Appends an ordering.
    pub fn order_by(&mut self, field: impl Into<String>, ascending: bool) -> &mut Self {
        self.clauses.push(QueryClause::OrderBy {
            field: field.into(),
            ascending,
        });
        self
    }

    /// Appends a row window.
    pub fn limit(&mut self, limit: i32, offset: i32) -> &mut Self {
        self.clauses.push(QueryClause::Limit { limit, offset });
        self
    }

    /// The selected table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Clauses in application order.
    pub fn clauses(&self) -> &[QueryClause] {
        &self.clauses
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT * FROM {}", self.table)?;
        let mut filtering = false;
        for clause in &self.clauses {
            match clause {
                QueryClause::EqualTo { field, value } | QueryClause::NotEqualTo { field, value } => {
                    if !filtering {
                        f.write_str(" WHERE")?;
                        filtering = true;
                    }
                    let op = if matches!(clause, QueryClause::EqualTo { .. }) { "=" } else { "!=" };
                    write!(f, " {field} {op} '{value}'")?;
                }
                QueryClause::And => f.write_str(" AND")?,
                QueryClause::Or => f.write_str(" OR")?,
                QueryClause::OrderBy { field, ascending } => {
                    write!(f, " ORDER BY {field} {}", if *ascending { "ASC" } else { "DESC" })?;
                }
                QueryClause::Limit { limit, offset } => write!(f, " LIMIT {limit} OFFSET {offset}")?,
            }
        }
        Ok(())
    }
}
