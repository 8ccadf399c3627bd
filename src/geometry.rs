//! Geometry codec
//!
//! Features are stored as one point row per vertex. This module converts
//! between the wire coordinate payloads (`[lon, lat]`, lists of them, or rings
//! of them) and that vertex sequence.
//!
//! Polygons are limited to their outer ring. Holes are not representable in the
//! vertex-per-row layout and are dropped on encode.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed spatial reference of every stored coordinate (WGS 84)
pub const SRID: i64 = 4326;

/// Geometry type of a collected feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    Line,
    Polygon,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::Line => "Line",
            GeometryType::Polygon => "Polygon",
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeometryType {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Point" => Ok(GeometryType::Point),
            "Line" => Ok(GeometryType::Line),
            "Polygon" => Ok(GeometryType::Polygon),
            other => Err(GeometryError::UnknownType(other.to_string())),
        }
    }
}

/// Codec errors
#[derive(Error, Debug, PartialEq)]
pub enum GeometryError {
    #[error("unknown geometry type: {0}")]
    UnknownType(String),

    #[error("{0} coordinates must be an array")]
    NotAnArray(GeometryType),

    #[error("polygon has no outer ring")]
    MissingRing,
}

/// A single longitude/latitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub const ORIGIN: Coordinate = Coordinate { lon: 0.0, lat: 0.0 };

    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Read a `[lon, lat, ...]` pair, substituting `[0, 0]` when malformed
    pub fn from_value(value: &Value) -> Self {
        let Some(items) = value.as_array() else {
            return Self::ORIGIN;
        };
        if items.len() < 2 {
            return Self::ORIGIN;
        }
        match (items[0].as_f64(), items[1].as_f64()) {
            (Some(lon), Some(lat)) => Self::new(lon, lat),
            _ => Self::ORIGIN,
        }
    }

    pub fn to_value(self) -> Value {
        json!([self.lon, self.lat])
    }
}

/// Turn a coordinate payload into the ordered vertex list to store.
pub fn encode(kind: GeometryType, payload: &Value) -> Result<Vec<Coordinate>, GeometryError> {
    match kind {
        GeometryType::Point => Ok(vec![Coordinate::from_value(payload)]),
        GeometryType::Line => {
            let vertices = payload
                .as_array()
                .ok_or(GeometryError::NotAnArray(kind))?;
            Ok(vertices.iter().map(Coordinate::from_value).collect())
        }
        GeometryType::Polygon => {
            let rings = payload
                .as_array()
                .ok_or(GeometryError::NotAnArray(kind))?;
            let first = rings.first().ok_or(GeometryError::MissingRing)?;

            // A bare ring (`[[lon, lat], ...]`) is accepted as the outer ring
            let ring = if first.as_array().and_then(|c| c.first()).is_some_and(Value::is_number) {
                rings
            } else {
                first.as_array().ok_or(GeometryError::MissingRing)?
            };

            Ok(ring.iter().map(Coordinate::from_value).collect())
        }
    }
}

/// Rebuild the coordinate payload from stored vertices in creation order.
///
/// Returns `Value::Null` when there is nothing to reconstruct.
pub fn decode(kind: GeometryType, vertices: &[Coordinate]) -> Value {
    if vertices.is_empty() {
        return Value::Null;
    }

    match kind {
        GeometryType::Point => vertices[0].to_value(),
        GeometryType::Line => Value::Array(vertices.iter().map(|c| c.to_value()).collect()),
        GeometryType::Polygon => {
            let mut ring: Vec<Value> = vertices.iter().map(|c| c.to_value()).collect();
            if vertices.first() != vertices.last() {
                ring.push(vertices[0].to_value());
            }
            Value::Array(vec![Value::Array(ring)])
        }
    }
}

/// GeoJSON geometry object for the stored vertices
pub fn to_geojson(kind: GeometryType, vertices: &[Coordinate]) -> Option<Value> {
    let coordinates = decode(kind, vertices);
    if coordinates.is_null() {
        return None;
    }

    let geojson_type = match kind {
        GeometryType::Point => "Point",
        GeometryType::Line => "LineString",
        GeometryType::Polygon => "Polygon",
    };

    Some(json!({
        "type": geojson_type,
        "coordinates": coordinates,
    }))
}
