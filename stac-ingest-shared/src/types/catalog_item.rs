//! Catalog item contract.
//!
//! A catalog item is a STAC Item: a GeoJSON Feature with an `id`, the `collection`
//! it belongs to, a geometry, temporal properties and opaque asset/link references.
//! Members this crate does not model are kept in `extra` maps so that a stored item
//! reproduces the submitted document.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ContractError;
use crate::types::geometry::Geometry;

fn feature_type() -> String {
    "Feature".to_string()
}

/// Natural key of a catalog item. Re-submitting a key replaces the stored item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub collection: String,
    pub id: String,
}

impl ItemKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Item properties. `datetime` is always serialized, as `null` when the item
/// describes a range through `start_datetime` and `end_datetime`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemProperties {
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemProperties {
    /// Properties for an instantaneous item.
    pub fn at(datetime: DateTime<Utc>) -> Self {
        Self {
            datetime: Some(datetime),
            start_datetime: None,
            end_datetime: None,
            extra: Map::new(),
        }
    }
}

/// A STAC Item as exchanged on the load channel.
///
/// # Fields
///
/// - `feature_type`: GeoJSON type, always `Feature`
/// - `id`: Identifier, unique within `collection`
/// - `collection`: Owning collection; required before the item can be stored
/// - `geometry`: Footprint of the item
/// - `bbox`: Optional bounding box of the footprint
/// - `properties`: Temporal and descriptive properties
/// - `assets`, `links`: Auxiliary references, stored verbatim
/// - `extra`: Any other top-level member, stored verbatim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogItem {
    #[serde(rename = "type", default = "feature_type")]
    pub feature_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stac_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stac_extensions: Vec<String>,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    pub properties: ItemProperties,
    #[serde(default)]
    pub assets: Map<String, Value>,
    #[serde(default)]
    pub links: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogItem {
    /// Create an item with empty assets and links.
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        geometry: Geometry,
        properties: ItemProperties,
    ) -> Self {
        Self {
            feature_type: feature_type(),
            stac_version: None,
            stac_extensions: Vec::new(),
            id: id.into(),
            collection: Some(collection.into()),
            geometry,
            bbox: None,
            properties,
            assets: Map::new(),
            links: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Decode and validate an item from a JSON document.
    ///
    /// The `collection` member is not required here; see [`CatalogItem::key`].
    pub fn from_json(body: &[u8]) -> Result<Self, ContractError> {
        let item: Self = serde_json::from_slice(body)?;
        item.validate()?;
        Ok(item)
    }

    /// Decode and validate an item from an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ContractError> {
        let item: Self = serde_json::from_value(value)?;
        item.validate()?;
        Ok(item)
    }

    /// Replace the collection attribution of the item.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Natural key of the item. Fails when the item has no collection.
    pub fn key(&self) -> Result<ItemKey, ContractError> {
        match self.collection.as_deref() {
            Some(collection) if !collection.trim().is_empty() => {
                Ok(ItemKey::new(collection, self.id.clone()))
            }
            _ => Err(ContractError::MissingField("collection")),
        }
    }

    /// Check the item invariants that do not depend on the catalog store.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.feature_type != "Feature" {
            return Err(ContractError::invalid_field(
                "type",
                format!("expected Feature, got {}", self.feature_type),
            ));
        }
        if self.id.trim().is_empty() {
            return Err(ContractError::MissingField("id"));
        }
        self.geometry.validate()?;
        if let Some(bbox) = &self.bbox {
            if bbox.len() != 4 && bbox.len() != 6 {
                return Err(ContractError::invalid_field(
                    "bbox",
                    format!("expected 4 or 6 values, got {}", bbox.len()),
                ));
            }
        }

        let properties = &self.properties;
        match (
            properties.datetime,
            properties.start_datetime,
            properties.end_datetime,
        ) {
            (None, Some(start), Some(end)) if start > end => Err(ContractError::invalid_field(
                "properties.start_datetime",
                "must not be after end_datetime",
            )),
            (None, Some(_), Some(_)) | (Some(_), _, _) => Ok(()),
            (None, _, _) => Err(ContractError::MissingField("properties.datetime")),
        }
    }

    /// Temporal extent `(start, end)` used to index the item.
    ///
    /// Instantaneous items have `start == end`.
    pub fn temporal_extent(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let properties = &self.properties;
        let start = properties.datetime.or(properties.start_datetime)?;
        let end = properties
            .end_datetime
            .or(properties.datetime)
            .unwrap_or(start);
        Some((start, end))
    }

    /// Bounding box declared on the item, or computed from its geometry.
    pub fn effective_bbox(&self) -> Option<Vec<f64>> {
        self.bbox
            .clone()
            .or_else(|| self.geometry.bbox().map(|bbox| bbox.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn item_document() -> Value {
        json!({
            "type": "Feature",
            "stac_version": "1.0.0",
            "id": "asset",
            "collection": "g",
            "geometry": {"type": "Point", "coordinates": [-85.0, 45.0]},
            "properties": {"datetime": "2021-01-01T00:00:00Z", "platform": "landsat-8"},
            "assets": {"data": {"href": "https://example/asset.tif"}},
            "links": [{"rel": "self", "href": "https://example/asset.json"}],
            "proj:epsg": 4326
        })
    }

    #[test]
    fn test_decode_item() {
        let item = CatalogItem::from_value(item_document()).unwrap();

        assert_eq!(item.key().unwrap(), ItemKey::new("g", "asset"));
        assert_eq!(
            item.properties.datetime,
            Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(item.properties.extra["platform"], json!("landsat-8"));
        assert_eq!(item.extra["proj:epsg"], json!(4326));
        assert_eq!(item.assets.len(), 1);
        assert_eq!(item.links.len(), 1);
    }

    #[test]
    fn test_serialization_preserves_document() {
        let item = CatalogItem::from_value(item_document()).unwrap();
        let value = serde_json::to_value(&item).unwrap();

        assert_eq!(value["properties"]["datetime"], json!("2021-01-01T00:00:00Z"));
        assert_eq!(value["proj:epsg"], json!(4326));
        assert_eq!(value["assets"], item_document()["assets"]);
        assert_eq!(CatalogItem::from_value(value).unwrap(), item);
    }

    #[test]
    fn test_type_defaults_to_feature() {
        let mut document = item_document();
        document.as_object_mut().unwrap().remove("type");

        let item = CatalogItem::from_value(document).unwrap();
        assert_eq!(item.feature_type, "Feature");
    }

    #[test]
    fn test_missing_collection_fails_key() {
        let mut document = item_document();
        document.as_object_mut().unwrap().remove("collection");

        let item = CatalogItem::from_value(document).unwrap();
        assert!(matches!(
            item.key(),
            Err(ContractError::MissingField("collection"))
        ));
        assert_eq!(
            item.with_collection("override").key().unwrap(),
            ItemKey::new("override", "asset")
        );
    }

    #[test]
    fn test_missing_datetime_is_invalid() {
        let mut document = item_document();
        document["properties"] = json!({"platform": "landsat-8"});

        let err = CatalogItem::from_value(document).unwrap_err();
        assert!(matches!(
            err,
            ContractError::MissingField("properties.datetime")
        ));
    }

    #[test]
    fn test_null_datetime_with_range_is_valid() {
        let mut document = item_document();
        document["properties"] = json!({
            "datetime": null,
            "start_datetime": "2020-01-01T00:00:00Z",
            "end_datetime": "2020-12-31T23:59:59Z"
        });

        let item = CatalogItem::from_value(document).unwrap();
        let (start, end) = item.temporal_extent().unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2020, 12, 31, 23, 59, 59).unwrap());
        assert_eq!(
            serde_json::to_value(&item).unwrap()["properties"]["datetime"],
            Value::Null
        );
    }

    #[test]
    fn test_not_json_is_malformed() {
        let err = CatalogItem::from_json(b"not json").unwrap_err();
        assert!(matches!(err, ContractError::Malformed(_)));
    }

    #[test]
    fn test_effective_bbox_falls_back_to_geometry() {
        let item = CatalogItem::from_value(item_document()).unwrap();
        assert_eq!(item.effective_bbox(), Some(vec![-85.0, 45.0, -85.0, 45.0]));
    }

    #[test]
    fn test_item_key_display() {
        assert_eq!(ItemKey::new("g", "asset").to_string(), "g/asset");
    }
}
