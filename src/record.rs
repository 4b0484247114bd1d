use serde::{Deserialize, Serialize};

/// One row of the Active Asbestos Projects report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub contractor: String,
    pub start: String,
    pub end: String,
    pub street: String,
    pub city: String,
    pub zip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
}

impl RawRecord {
    /// Single-line address sent to the geocoder: "street, city, zip, STATE".
    pub fn address(&self, state: &str) -> String {
        format!("{}, {}, {}, {}", self.street, self.city, self.zip, state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// A raw record plus its location. Both coordinates are present or neither is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: RawRecord,
    #[serde(flatten, default)]
    pub coordinates: Option<Coordinates>,
}

impl EnrichedRecord {
    pub fn new(record: RawRecord, coordinates: Option<Coordinates>) -> Self {
        Self { record, coordinates }
    }

    pub fn is_located(&self) -> bool {
        self.coordinates.is_some()
    }
}
