//! Record trait and query types

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// A value stored in a secondary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    /// Text form stored in the `value` column
    pub(crate) fn as_text(&self) -> String {
        match self {
            IndexValue::String(s) => s.clone(),
            IndexValue::Int(i) => i.to_string(),
            IndexValue::Bool(b) => b.to_string(),
        }
    }

    /// Integer form stored in the `value_int` column, if any
    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            IndexValue::String(_) => None,
            IndexValue::Int(i) => Some(*i),
            IndexValue::Bool(b) => Some(i64::from(*b)),
        }
    }
}

/// Comparison operator for a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub(crate) fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }
}

/// A single condition on an indexed field
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    /// Equality filter, the common case
    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }
}

/// A type that can be persisted in the store
///
/// Records are serialized to JSON. `indexed_fields` is recomputed on every
/// write and drives `Store::list` filters.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique id within the collection
    fn id(&self) -> &str;

    /// Last update timestamp (Unix milliseconds)
    fn updated_at(&self) -> i64;

    /// Collection (table partition) name
    fn collection_name() -> &'static str;

    /// Secondary index values for filtering
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_value_forms() {
        assert_eq!(IndexValue::Int(42).as_text(), "42");
        assert_eq!(IndexValue::Int(42).as_int(), Some(42));
        assert_eq!(IndexValue::Bool(true).as_int(), Some(1));
        assert_eq!(IndexValue::String("x".to_string()).as_int(), None);
    }

    #[test]
    fn test_filter_eq() {
        let filter = Filter::eq("status", IndexValue::String("running".to_string()));
        assert_eq!(filter.op, FilterOp::Eq);
        assert_eq!(filter.op.as_sql(), "=");
    }
}
