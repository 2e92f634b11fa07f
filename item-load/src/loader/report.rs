//! Per-message outcome of a load batch.

use stac_ingest_queue::BatchResponse;

use crate::errors::LoadError;

/// A message that could not be loaded.
#[derive(Debug)]
pub struct LoadFailure {
    pub message_id: String,
    pub error: LoadError,
}

/// Outcome of loading one batch.
///
/// Every message of the batch lands in exactly one of `loaded` or `failures`.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_loaded(&mut self, message_id: impl Into<String>) {
        self.loaded.push(message_id.into());
    }

    pub fn record_failure(&mut self, message_id: impl Into<String>, error: LoadError) {
        self.failures.push(LoadFailure {
            message_id: message_id.into(),
            error,
        });
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Number of failures that may succeed on redelivery.
    pub fn transient_failure_count(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| failure.error.is_transient())
            .count()
    }

    /// Partial batch response listing every failed message.
    pub fn to_response(&self) -> BatchResponse {
        BatchResponse::from_failures(
            self.failures
                .iter()
                .map(|failure| failure.message_id.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stac_ingest_shared::ContractError;

    #[test]
    fn test_response_lists_failures_only() {
        let mut report = LoadReport::new();
        report.record_loaded("m-1");
        report.record_failure("m-2", LoadError::from(ContractError::MissingField("id")));
        report.record_failure("m-3", LoadError::StoreUnavailable("down".to_string()));

        let response = report.to_response();
        assert_eq!(response.failure_count(), 2);
        assert!(response.is_failed("m-2"));
        assert!(response.is_failed("m-3"));
        assert!(!response.is_failed("m-1"));
        assert_eq!(report.transient_failure_count(), 1);
    }
}
