use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::cache::GeocodeCache;
use crate::record::Coordinates;

const CENSUS_ONELINE_URL: &str =
    "https://geocoding.geo.census.gov/geocoder/locations/onelineaddress";
const CENSUS_BENCHMARK: &str = "Public_AR_Current";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One upstream geocoding call. `Ok(None)` means the service answered but
/// found no match.
#[async_trait]
pub trait GeocodeLookup: Send + Sync {
    async fn lookup(&self, address: &str) -> Result<Option<Coordinates>>;
}

/// US Census Bureau one-line address geocoder.
pub struct CensusLookup {
    http: reqwest::Client,
    endpoint: String,
}

impl CensusLookup {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(CENSUS_ONELINE_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build geocoder HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CensusResponse {
    result: Option<CensusResult>,
}

#[derive(Debug, Deserialize)]
struct CensusResult {
    #[serde(rename = "addressMatches", default)]
    address_matches: Vec<AddressMatch>,
}

#[derive(Debug, Deserialize)]
struct AddressMatch {
    coordinates: CensusPoint,
}

/// Census points are (x, y) = (longitude, latitude).
#[derive(Debug, Deserialize)]
struct CensusPoint {
    x: f64,
    y: f64,
}

impl From<CensusPoint> for Coordinates {
    fn from(p: CensusPoint) -> Self {
        Coordinates { lat: p.y, lng: p.x }
    }
}

fn first_match(response: CensusResponse) -> Option<Coordinates> {
    response
        .result?
        .address_matches
        .into_iter()
        .next()
        .map(|m| m.coordinates.into())
}

#[async_trait]
impl GeocodeLookup for CensusLookup {
    async fn lookup(&self, address: &str) -> Result<Option<Coordinates>> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("address", address),
                ("benchmark", CENSUS_BENCHMARK),
                ("format", "json"),
            ])
            .send()
            .await
            .context("Geocoder request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Geocoder returned HTTP {}", status);
        }

        let body: CensusResponse = response
            .json()
            .await
            .context("Geocoder returned malformed JSON")?;
        Ok(first_match(body))
    }
}

/// Cache-first geocoder. Owns the cache for the duration of the run.
pub struct Geocoder {
    lookup: Box<dyn GeocodeLookup>,
    cache: GeocodeCache,
    network_calls: usize,
}

impl Geocoder {
    pub fn new(lookup: Box<dyn GeocodeLookup>, cache: GeocodeCache) -> Self {
        Self {
            lookup,
            cache,
            network_calls: 0,
        }
    }

    /// Resolve an address. Failures and misses are logged and yield `None`;
    /// only hits are cached so a later run can retry the rest.
    pub async fn geocode(&mut self, address: &str) -> Option<Coordinates> {
        if let Some(hit) = self.cache.get(address) {
            debug!("Cache hit: {}", address);
            return Some(hit);
        }

        self.network_calls += 1;
        match self.lookup.lookup(address).await {
            Ok(Some(coords)) => {
                self.cache.insert(address.to_string(), coords);
                Some(coords)
            }
            Ok(None) => {
                warn!("No address match for {}", address);
                None
            }
            Err(e) => {
                warn!("Geocoding error for {}: {:#}", address, e);
                None
            }
        }
    }

    /// Whether the next `geocode` for this address will go to the network.
    pub fn is_cached(&self, address: &str) -> bool {
        self.cache.get(address).is_some()
    }

    pub fn network_calls(&self) -> usize {
        self.network_calls
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    pub fn into_cache(self) -> GeocodeCache {
        self.cache
    }
}
