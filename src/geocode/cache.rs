use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::record::Coordinates;
use crate::store;

/// Address → coordinates, persisted between runs. Only positive results are
/// ever stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodeCache {
    entries: BTreeMap<String, Coordinates>,
}

impl GeocodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the persisted cache. Missing or unreadable files start empty.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("No geocode cache at {}, starting empty", path.display());
            return Self::new();
        }
        match store::read_json::<BTreeMap<String, Coordinates>>(path) {
            Ok(entries) => {
                info!("Loaded {} cached addresses", entries.len());
                Self { entries }
            }
            Err(e) => {
                warn!("Ignoring unreadable geocode cache {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    /// Overwrite the persisted cache with the full in-memory mapping.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        store::write_json(path, &self.entries)
    }

    pub fn get(&self, address: &str) -> Option<Coordinates> {
        self.entries.get(address).copied()
    }

    pub fn insert(&mut self, address: String, coordinates: Coordinates) {
        self.entries.insert(address, coordinates);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode_cache.json");

        let mut cache = GeocodeCache::new();
        cache.insert("1 MAIN ST, ALBANY, 12207, NY".into(), Coordinates { lat: 42.65, lng: -73.75 });
        cache.insert("100 BROADWAY, NEW YORK, 10005, NY".into(), Coordinates { lat: 40.7081, lng: -74.0110 });
        cache.save(&path).unwrap();

        assert_eq!(GeocodeCache::load(&path), cache);
    }

    #[test]
    fn save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode_cache.json");

        let mut first = GeocodeCache::new();
        first.insert("A".into(), Coordinates { lat: 1.0, lng: 2.0 });
        first.save(&path).unwrap();

        let mut second = GeocodeCache::new();
        second.insert("B".into(), Coordinates { lat: 3.0, lng: 4.0 });
        second.save(&path).unwrap();

        let loaded = GeocodeCache::load(&path);
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("A").is_none());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GeocodeCache::load(&dir.path().join("nope.json")).is_empty());
    }

    #[test]
    fn corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode_cache.json");
        std::fs::write(&path, "{\"A\": {\"lat\": 1.0,").unwrap();
        assert!(GeocodeCache::load(&path).is_empty());
    }

    #[test]
    fn file_format_is_address_keyed_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode_cache.json");
        std::fs::write(&path, r#"{"45 STATE ST, ALBANY, 12207, NY": {"lat": 42.6497, "lng": -73.7537}}"#)
            .unwrap();
        let cache = GeocodeCache::load(&path);
        assert_eq!(
            cache.get("45 STATE ST, ALBANY, 12207, NY"),
            Some(Coordinates { lat: 42.6497, lng: -73.7537 })
        );
    }
}
