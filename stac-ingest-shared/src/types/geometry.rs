//! GeoJSON geometry types for catalog items.

use serde::{Deserialize, Serialize};

use crate::errors::ContractError;

/// A WGS84 position: `[longitude, latitude]` with an optional elevation.
pub type Position = Vec<f64>;

/// GeoJSON geometry, tagged by its `type` member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    /// Name of the geometry type as written in the `type` member.
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "Point",
            Geometry::MultiPoint { .. } => "MultiPoint",
            Geometry::LineString { .. } => "LineString",
            Geometry::MultiLineString { .. } => "MultiLineString",
            Geometry::Polygon { .. } => "Polygon",
            Geometry::MultiPolygon { .. } => "MultiPolygon",
            Geometry::GeometryCollection { .. } => "GeometryCollection",
        }
    }

    /// Check coordinate ranges and the structural rules of each geometry type.
    pub fn validate(&self) -> Result<(), ContractError> {
        match self {
            Geometry::Point { coordinates } => validate_position(coordinates),
            Geometry::MultiPoint { coordinates } => {
                coordinates.iter().try_for_each(|p| validate_position(p))
            }
            Geometry::LineString { coordinates } => validate_line(coordinates),
            Geometry::MultiLineString { coordinates } => {
                coordinates.iter().try_for_each(|line| validate_line(line))
            }
            Geometry::Polygon { coordinates } => validate_polygon(coordinates),
            Geometry::MultiPolygon { coordinates } => {
                if coordinates.is_empty() {
                    return Err(ContractError::geometry("MultiPolygon has no polygons"));
                }
                coordinates.iter().try_for_each(|rings| validate_polygon(rings))
            }
            Geometry::GeometryCollection { geometries } => {
                geometries.iter().try_for_each(Geometry::validate)
            }
        }
    }

    /// Compute the 2D bounding box `[minx, miny, maxx, maxy]`.
    ///
    /// Returns `None` for geometries without positions.
    pub fn bbox(&self) -> Option<[f64; 4]> {
        let mut bounds: Option<[f64; 4]> = None;
        self.for_each_position(&mut |position: &Position| {
            if position.len() < 2 {
                return;
            }
            let (x, y) = (position[0], position[1]);
            bounds = Some(match bounds {
                None => [x, y, x, y],
                Some([minx, miny, maxx, maxy]) => {
                    [minx.min(x), miny.min(y), maxx.max(x), maxy.max(y)]
                }
            });
        });
        bounds
    }

    fn for_each_position(&self, visit: &mut dyn FnMut(&Position)) {
        match self {
            Geometry::Point { coordinates } => visit(coordinates),
            Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
                coordinates.iter().for_each(|p| visit(p))
            }
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                coordinates.iter().flatten().for_each(|p| visit(p))
            }
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().for_each(|p| visit(p))
            }
            Geometry::GeometryCollection { geometries } => {
                for geometry in geometries {
                    geometry.for_each_position(visit);
                }
            }
        }
    }
}

fn validate_position(position: &Position) -> Result<(), ContractError> {
    if position.len() != 2 && position.len() != 3 {
        return Err(ContractError::geometry(format!(
            "position must have 2 or 3 values, got {}",
            position.len()
        )));
    }
    if position.iter().any(|v| !v.is_finite()) {
        return Err(ContractError::geometry("position contains a non-finite value"));
    }
    let (lon, lat) = (position[0], position[1]);
    if !(-180.0..=180.0).contains(&lon) {
        return Err(ContractError::geometry(format!("longitude {lon} out of range")));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ContractError::geometry(format!("latitude {lat} out of range")));
    }
    Ok(())
}

fn validate_line(line: &[Position]) -> Result<(), ContractError> {
    if line.len() < 2 {
        return Err(ContractError::geometry("LineString needs at least 2 positions"));
    }
    line.iter().try_for_each(validate_position)
}

fn validate_polygon(rings: &[Vec<Position>]) -> Result<(), ContractError> {
    if rings.is_empty() {
        return Err(ContractError::geometry("Polygon has no rings"));
    }
    for ring in rings {
        if ring.len() < 4 {
            return Err(ContractError::geometry(
                "linear ring needs at least 4 positions",
            ));
        }
        ring.iter().try_for_each(validate_position)?;
        if ring.first() != ring.last() {
            return Err(ContractError::geometry("linear ring is not closed"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square() -> Geometry {
        Geometry::Polygon {
            coordinates: vec![vec![
                vec![-90.0, 40.0],
                vec![-80.0, 40.0],
                vec![-80.0, 50.0],
                vec![-90.0, 50.0],
                vec![-90.0, 40.0],
            ]],
        }
    }

    #[test]
    fn test_decode_polygon() {
        let geometry: Geometry = serde_json::from_value(json!({
            "type": "Polygon",
            "coordinates": [[[-90.0, 40.0], [-80.0, 40.0], [-80.0, 50.0], [-90.0, 50.0], [-90.0, 40.0]]]
        }))
        .unwrap();

        assert_eq!(geometry, square());
        assert_eq!(geometry.kind(), "Polygon");
        geometry.validate().unwrap();
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<Geometry, _> =
            serde_json::from_value(json!({"type": "Circle", "coordinates": [0.0, 0.0]}));
        assert!(result.is_err());
    }

    #[test]
    fn test_open_ring_is_invalid() {
        let geometry = Geometry::Polygon {
            coordinates: vec![vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![1.0, 1.0],
                vec![0.0, 1.0],
            ]],
        };
        assert!(matches!(
            geometry.validate(),
            Err(ContractError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_out_of_range_latitude_is_invalid() {
        let geometry = Geometry::Point {
            coordinates: vec![10.0, 95.0],
        };
        assert!(geometry.validate().is_err());
    }

    #[test]
    fn test_bbox_of_polygon() {
        assert_eq!(square().bbox(), Some([-90.0, 40.0, -80.0, 50.0]));
    }

    #[test]
    fn test_bbox_of_collection_spans_members() {
        let geometry = Geometry::GeometryCollection {
            geometries: vec![
                Geometry::Point {
                    coordinates: vec![5.0, 5.0],
                },
                Geometry::Point {
                    coordinates: vec![-5.0, 10.0],
                },
            ],
        };
        assert_eq!(geometry.bbox(), Some([-5.0, 5.0, 5.0, 10.0]));

        let empty = Geometry::GeometryCollection { geometries: vec![] };
        assert_eq!(empty.bbox(), None);
    }
}
