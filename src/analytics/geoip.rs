//! GeoIP lookup service using MaxMind GeoLite2/GeoIP2 MMDB
//!
//! This module provides thread-safe IP geolocation using a memory-mapped
//! MaxMind City database. Lookups are fallible: the enrichment worker leaves
//! geo fields empty on any error and never retries.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::analytics::models::GeoLocation;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("no GeoIP database configured")]
    Unavailable,
    #[error("no GeoIP record for {0}")]
    NotFound(IpAddr),
    #[error("GeoIP lookup failed: {0}")]
    Lookup(String),
}

/// IP -> location provider consumed by the enrichment worker
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError>;
}

/// GeoIP lookup service backed by a City database
pub struct GeoIpService {
    city_reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    /// Create a new GeoIP service from an optional MMDB file path
    ///
    /// # Arguments
    /// * `city_path` - Path to the MaxMind GeoLite2-City or GeoIP2-City .mmdb file
    ///
    /// # Returns
    /// A service whose lookups fail with [`GeoError::Unavailable`] when no path is given
    pub fn new(city_path: Option<&str>) -> Result<Self> {
        let city_reader = if let Some(path) = city_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self { city_reader })
    }

    /// Service without a database; every lookup reports `Unavailable`
    pub fn disabled() -> Self {
        Self { city_reader: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.city_reader.is_some()
    }

    /// Extract location from City data
    fn extract_from_city(&self, city: &geoip2::City, geo_location: &mut GeoLocation) {
        geo_location.country = city.country.iso_code.map(|s| s.to_string());

        if let Some(subdivision) = city.subdivisions.first() {
            geo_location.region = subdivision.names.english.map(|s| s.to_string());
        }

        geo_location.city = city.city.names.english.map(|s| s.to_string());
        geo_location.latitude = city.location.latitude;
        geo_location.longitude = city.location.longitude;
    }
}

impl GeoLookup for GeoIpService {
    fn lookup(&self, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        let reader = self.city_reader.as_ref().ok_or(GeoError::Unavailable)?;

        let result = reader
            .lookup(ip)
            .map_err(|e| GeoError::Lookup(e.to_string()))?;

        let city = result
            .decode::<geoip2::City>()
            .map_err(|e| GeoError::Lookup(e.to_string()))?
            .ok_or(GeoError::NotFound(ip))?;

        let mut geo_location = GeoLocation::default();
        self.extract_from_city(&city, &mut geo_location);
        Ok(geo_location)
    }
}

// Implement Clone by cloning the Arc
impl Clone for GeoIpService {
    fn clone(&self) -> Self {
        Self {
            city_reader: self.city_reader.clone(),
        }
    }
}
