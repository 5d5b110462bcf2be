//! Audited entity types of the passenger service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capture::entity::{ColumnValue, Entity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passenger {
    pub id: Option<i64>,
    pub name: String,
    pub weight: f64,
    pub nationality: Option<String>,
    pub manifest_id: Option<i64>,
}

impl Passenger {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: None,
            name: name.into(),
            weight,
            nationality: None,
            manifest_id: None,
        }
    }
}

impl Entity for Passenger {
    const ENTITY_TYPE: &'static str = "Passenger";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn columns(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("id".to_string(), self.id.column_string()),
            ("name".to_string(), self.name.column_string()),
            ("weight".to_string(), self.weight.column_string()),
            ("nationality".to_string(), self.nationality.column_string()),
            ("manifest_id".to_string(), self.manifest_id.column_string()),
        ])
    }
}

/// A ship call's passenger manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipCallManifest {
    pub id: Option<i64>,
    pub vessel_name: String,
    pub port: String,
    pub passenger_count: i64,
}

impl Entity for ShipCallManifest {
    const ENTITY_TYPE: &'static str = "ShipCallManifest";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn columns(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("id".to_string(), self.id.column_string()),
            ("vessel_name".to_string(), self.vessel_name.column_string()),
            ("port".to_string(), self.port.column_string()),
            ("passenger_count".to_string(), self.passenger_count.column_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passenger_columns() {
        let mut passenger = Passenger::new("Ada", 70.0);
        let columns = passenger.columns();
        assert_eq!(columns["id"], "None");
        assert_eq!(columns["weight"], "70.0");
        assert_eq!(columns["nationality"], "None");

        passenger.set_id(42);
        assert_eq!(passenger.columns()["id"], "42");
    }
}
