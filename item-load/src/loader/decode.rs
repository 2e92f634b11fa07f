//! Decoding of load channel messages.

use serde_json::Value;
use stac_ingest_shared::{CatalogItem, ContractError};

use crate::errors::LoadError;

/// Member of a notification envelope holding the published document as a string.
const ENVELOPE_MESSAGE_FIELD: &str = "Message";

/// Decode one load message into a catalog item ready to be stored.
///
/// The body is either the item document itself or a notification envelope whose
/// `Message` member carries the item document as a JSON string. Both forms load
/// identically. Items without a collection are rejected here.
pub fn decode_message(body: &[u8]) -> Result<CatalogItem, LoadError> {
    let value: Value = serde_json::from_slice(body).map_err(ContractError::from)?;
    let document = unwrap_envelope(value)?;

    let item = CatalogItem::from_value(document)?;
    item.key()?;
    Ok(item)
}

fn unwrap_envelope(value: Value) -> Result<Value, LoadError> {
    match value.get(ENVELOPE_MESSAGE_FIELD) {
        Some(Value::String(inner)) => {
            let document = serde_json::from_str(inner).map_err(ContractError::from)?;
            Ok(document)
        }
        _ => Ok(value),
    }
}
