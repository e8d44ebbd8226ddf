//! Pickup coordinates: validation, WKT geography points, and the distance
//! math behind the nearby-listings search.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean earth radius (IUGG) in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Relative slack added to the bounding box so float rounding never
/// drops a point that sits exactly on the radius.
const BOX_MARGIN: f64 = 1e-3;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("malformed point: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    fn validate(&self) -> Result<(), GeoError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(GeoError::Latitude(self.lat));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(GeoError::Longitude(self.lng));
        }
        Ok(())
    }

    /// Builds a point from a nullable column pair. Both or neither are set.
    pub fn from_columns(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Self { lat, lng }),
            _ => None,
        }
    }

    /// Geography point in EWKT, longitude first.
    pub fn to_wkt(&self) -> String {
        format!("SRID=4326;POINT({} {})", self.lng, self.lat)
    }

    /// Parses `POINT(lng lat)`, with or without an `SRID=…;` prefix.
    pub fn from_wkt(input: &str) -> Result<Self, GeoError> {
        let malformed = || GeoError::Malformed(input.to_string());
        let body = match input.split_once(';') {
            Some((srid, rest)) if srid.trim().to_ascii_uppercase().starts_with("SRID=") => rest,
            Some(_) => return Err(malformed()),
            None => input,
        };
        let body = body.trim();
        let upper = body.to_ascii_uppercase();
        if !upper.starts_with("POINT") {
            return Err(malformed());
        }
        let coords = body[5..]
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(malformed)?;
        let mut parts = coords.split_whitespace();
        let lng = parts.next().and_then(|v| v.parse::<f64>().ok()).ok_or_else(malformed)?;
        let lat = parts.next().and_then(|v| v.parse::<f64>().ok()).ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Self::new(lat, lng)
    }

    pub fn formatted(&self) -> String {
        format!("{:.6}, {:.6}", self.lat, self.lng)
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }
}

/// Coarse rectangle used to pre-filter rows before the exact distance check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    /// `None` when the box wraps the antimeridian or covers a pole.
    pub lng_range: Option<(f64, f64)>,
}

impl BoundingBox {
    /// Smallest lat/lng rectangle on the `EARTH_RADIUS_KM` sphere holding
    /// every point within `radius_km` of `center`, plus `BOX_MARGIN`.
    pub fn around(center: &GeoPoint, radius_km: f64) -> Self {
        let angular = radius_km / EARTH_RADIUS_KM;
        let dlat = angular.to_degrees() * (1.0 + BOX_MARGIN);
        let min_lat = (center.lat - dlat).max(-90.0);
        let max_lat = (center.lat + dlat).min(90.0);

        let cos_lat = center.lat.to_radians().cos();
        let sin_angular = angular.min(std::f64::consts::FRAC_PI_2).sin();
        let lng_range = if min_lat <= -90.0 || max_lat >= 90.0 || sin_angular >= cos_lat {
            None
        } else {
            let dlng = (sin_angular / cos_lat).asin().to_degrees() * (1.0 + BOX_MARGIN);
            let (lo, hi) = (center.lng - dlng, center.lng + dlng);
            (lo >= -180.0 && hi <= 180.0).then_some((lo, hi))
        };

        Self { min_lat, max_lat, lng_range }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.lat < self.min_lat || point.lat > self.max_lat {
            return false;
        }
        match self.lng_range {
            Some((lo, hi)) => point.lng >= lo && point.lng <= hi,
            None => true,
        }
    }
}
