pub mod cache;
pub mod client;

pub use cache::GeocodeCache;
pub use client::{CensusLookup, GeocodeLookup, Geocoder};
