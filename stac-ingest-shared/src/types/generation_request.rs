//! Generation request contract.
//!
//! A generation request names an external transformation package and the arguments
//! it should be invoked with. It carries no identity of its own: the identity of the
//! work is the `(collection, id)` key of the item it produces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ContractError;

/// Request to generate one catalog item with an external transformation package.
///
/// # Fields
///
/// - `package_name`: Package providing the transformation (may carry a version pin)
/// - `group_name`: Command group of the transformation within the package
/// - `create_item_args`: Positional arguments, passed in order
/// - `create_item_options`: Named options, passed as `--<name> <value>` in key order
/// - `collection_id`: Overrides the `collection` of the produced item when set
///
/// # Example
///
/// ```
/// use stac_ingest_shared::GenerationRequest;
///
/// let request = GenerationRequest::from_json(
///     br#"{"package_name":"stactools-glad-glclu2020","group_name":"gladglclu2020","create_item_args":["https://example/50N_090W.tif"]}"#,
/// )
/// .unwrap();
/// assert!(request.create_item_options.is_empty());
/// assert!(request.collection_id.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationRequest {
    pub package_name: String,
    pub group_name: String,
    pub create_item_args: Vec<String>,
    #[serde(default)]
    pub create_item_options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
}

impl GenerationRequest {
    /// Create a request with no options and no collection override.
    pub fn new(
        package_name: impl Into<String>,
        group_name: impl Into<String>,
        create_item_args: Vec<String>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            group_name: group_name.into(),
            create_item_args,
            create_item_options: BTreeMap::new(),
            collection_id: None,
        }
    }

    /// Add a named option.
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.create_item_options.insert(name.into(), value.into());
        self
    }

    /// Set the collection override.
    pub fn with_collection(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    /// Decode and validate a request from a JSON message body.
    pub fn from_json(body: &[u8]) -> Result<Self, ContractError> {
        let request: Self = serde_json::from_slice(body)?;
        request.validate()?;
        Ok(request)
    }

    /// Check the invariants a request must hold before it is executed.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.package_name.trim().is_empty() {
            return Err(ContractError::MissingField("package_name"));
        }
        if self.group_name.trim().is_empty() {
            return Err(ContractError::MissingField("group_name"));
        }
        if let Some(name) = self
            .create_item_options
            .keys()
            .find(|name| name.is_empty() || name.starts_with('-'))
        {
            return Err(ContractError::invalid_field(
                "create_item_options",
                format!("option name {name:?} must be non-empty and unprefixed"),
            ));
        }
        if matches!(&self.collection_id, Some(collection) if collection.trim().is_empty()) {
            return Err(ContractError::invalid_field(
                "collection_id",
                "must not be empty when present",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal_request() {
        let request = GenerationRequest::from_json(
            br#"{"package_name":"pkg-a","group_name":"g","create_item_args":[]}"#,
        )
        .unwrap();

        assert_eq!(request, GenerationRequest::new("pkg-a", "g", vec![]));
    }

    #[test]
    fn test_decode_full_request() {
        let request = GenerationRequest::from_json(
            br#"{
                "package_name": "stactools-glad-global-forest-change==0.1.2",
                "group_name": "gladglobalforestchange",
                "create_item_args": ["a.tif", "b.tif"],
                "create_item_options": {"year": "2023", "asset-href": "s3://bucket"},
                "collection_id": "forest-change"
            }"#,
        )
        .unwrap();

        assert_eq!(request.create_item_args, vec!["a.tif", "b.tif"]);
        let names: Vec<&str> = request
            .create_item_options
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(names, vec!["asset-href", "year"]);
        assert_eq!(request.collection_id.as_deref(), Some("forest-change"));
    }

    #[test]
    fn test_missing_args_is_malformed() {
        let err = GenerationRequest::from_json(br#"{"package_name":"pkg-a","group_name":"g"}"#)
            .unwrap_err();
        assert!(matches!(err, ContractError::Malformed(_)));
    }

    #[test]
    fn test_empty_package_name_is_rejected() {
        let err = GenerationRequest::from_json(
            br#"{"package_name":"  ","group_name":"g","create_item_args":[]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ContractError::MissingField("package_name")));
    }

    #[test]
    fn test_prefixed_option_is_rejected() {
        let request = GenerationRequest::new("pkg-a", "g", vec![]).with_option("--year", "2020");
        assert!(matches!(
            request.validate(),
            Err(ContractError::InvalidField {
                field: "create_item_options",
                ..
            })
        ));
    }

    #[test]
    fn test_serialization_omits_absent_collection() {
        let json = serde_json::to_value(GenerationRequest::new("pkg-a", "g", vec![])).unwrap();
        assert!(json.get("collection_id").is_none());
        assert_eq!(json["create_item_options"], serde_json::json!({}));
    }
}
