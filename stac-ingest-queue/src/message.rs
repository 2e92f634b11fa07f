//! Message types exchanged with the queue substrate.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A message delivered to a stage consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Identifier assigned by the substrate; used to report failures.
    pub message_id: String,
    /// Verbatim payload as published.
    pub body: Vec<u8>,
    /// Number of times this message has been delivered, this delivery included.
    pub receive_count: u32,
}

impl QueueMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<Vec<u8>>, receive_count: u32) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            receive_count,
        }
    }
}

/// One failed message of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

/// Partial batch response.
///
/// Lists the messages of a batch that must stay on the queue for redelivery.
/// Every message of the batch not listed here is acknowledged.
///
/// Serialized as `{"batchItemFailures": [{"itemIdentifier": "..."}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    /// Response for a batch where every message succeeded.
    pub fn success() -> Self {
        Self::default()
    }

    /// Response failing the given message identifiers.
    pub fn from_failures<I, S>(message_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            batch_item_failures: message_ids
                .into_iter()
                .map(|id| BatchItemFailure {
                    item_identifier: id.into(),
                })
                .collect(),
        }
    }

    /// Record one more failed message.
    pub fn fail(&mut self, message_id: impl Into<String>) {
        self.batch_item_failures.push(BatchItemFailure {
            item_identifier: message_id.into(),
        });
    }

    pub fn is_failed(&self, message_id: &str) -> bool {
        self.batch_item_failures
            .iter()
            .any(|failure| failure.item_identifier == message_id)
    }

    pub fn failed_ids(&self) -> HashSet<&str> {
        self.batch_item_failures
            .iter()
            .map(|failure| failure.item_identifier.as_str())
            .collect()
    }

    pub fn failure_count(&self) -> usize {
        self.batch_item_failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_response_wire_format() {
        let response = BatchResponse::from_failures(["m-1", "m-3"]);

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "batchItemFailures": [
                    {"itemIdentifier": "m-1"},
                    {"itemIdentifier": "m-3"}
                ]
            })
        );
    }

    #[test]
    fn test_success_response_is_empty() {
        let response = BatchResponse::success();
        assert!(response.is_success());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"batchItemFailures": []})
        );
    }

    #[test]
    fn test_failed_lookup() {
        let mut response = BatchResponse::success();
        response.fail("m-2");

        assert!(response.is_failed("m-2"));
        assert!(!response.is_failed("m-1"));
        assert_eq!(response.failure_count(), 1);
        assert!(response.failed_ids().contains("m-2"));
    }
}
