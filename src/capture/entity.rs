//! Column-level view of persisted entities.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

/// String form of a column value as it appears in audit diffs.
///
/// Floats keep their decimal point (`70.0`) and missing values read `None`.
pub trait ColumnValue {
    fn column_string(&self) -> String;
}

macro_rules! display_column {
    ($($ty:ty),*) => {
        $(impl ColumnValue for $ty {
            fn column_string(&self) -> String {
                self.to_string()
            }
        })*
    };
}

display_column!(String, str, bool, i16, i32, i64, u16, u32, u64, NaiveDate);

impl ColumnValue for f64 {
    fn column_string(&self) -> String {
        format!("{:?}", self)
    }
}

impl ColumnValue for f32 {
    fn column_string(&self) -> String {
        format!("{:?}", self)
    }
}

impl ColumnValue for DateTime<Utc> {
    fn column_string(&self) -> String {
        self.to_rfc3339()
    }
}

impl<T: ColumnValue> ColumnValue for Option<T> {
    fn column_string(&self) -> String {
        match self {
            Some(value) => value.column_string(),
            None => "None".to_string(),
        }
    }
}

impl<T: ColumnValue + ?Sized> ColumnValue for &T {
    fn column_string(&self) -> String {
        (**self).column_string()
    }
}

/// A persisted entity type with named columns.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Type name used for hook registration and in audit payloads.
    const ENTITY_TYPE: &'static str;

    /// Identity, `None` until first persisted.
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    /// Every mapped column, stringified.
    fn columns(&self) -> BTreeMap<String, String>;
}

/// What a lifecycle hook sees of an entity about to change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySnapshot {
    pub entity_type: String,
    pub id: Option<i64>,
    /// Column values as last committed. Empty for new entities.
    pub committed: BTreeMap<String, String>,
    /// Column values as they are about to be written.
    pub current: BTreeMap<String, String>,
    /// Whether the entity belongs to an open session.
    pub attached: bool,
}

impl EntitySnapshot {
    pub fn of<E: Entity>(entity: &E, committed: BTreeMap<String, String>) -> Self {
        Self {
            entity_type: E::ENTITY_TYPE.to_string(),
            id: entity.id(),
            committed,
            current: entity.columns(),
            attached: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_strings() {
        assert_eq!(70.0_f64.column_string(), "70.0");
        assert_eq!(72.5_f64.column_string(), "72.5");
        assert_eq!(Option::<i64>::None.column_string(), "None");
        assert_eq!(Some(42_i64).column_string(), "42");
        assert_eq!("Ada".column_string(), "Ada");
        assert_eq!(true.column_string(), "true");
    }
}
