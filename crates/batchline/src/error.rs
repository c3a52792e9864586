// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors surfaced by the ingest client.
///
/// Delivery failures are deliberately absent: flushes are retried by the
/// background worker and reported through diagnostics only, so callers of
/// `ingest` never observe them (see the crate docs on fire-and-forget).
#[derive(Debug, Error)]
pub enum Error {
    /// The endpoint could not be turned into a valid ingest URL.
    #[error("Invalid ingest endpoint: {0}")]
    InvalidEndpoint(String),

    /// A configuration value failed validation at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A record could not be encoded as JSON.
    #[error("Failed to encode record as JSON: {0}")]
    Encode(#[from] serde_json::Error),

    /// A record encoded to text containing a raw newline, which would break
    /// the one-value-per-line framing of the payload.
    #[error("Record encodes to more than one JSONL line")]
    MultilineRecord,

    /// The client was closed, or its worker has stopped; no further records
    /// are accepted.
    #[error("Ingest client is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidEndpoint("localhost:7280: relative URL without a base".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid ingest endpoint: localhost:7280: relative URL without a base"
        );

        let err = Error::InvalidConfig("batch size must be nonzero".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: batch size must be nonzero"
        );

        let err = Error::Closed;
        assert_eq!(err.to_string(), "Ingest client is closed");
    }

    #[test]
    fn test_encode_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::Encode(_)));
        assert!(err.to_string().starts_with("Failed to encode record as JSON"));
    }

    #[test]
    fn test_error_debug_names_variant() {
        let err = Error::MultilineRecord;
        assert!(format!("{err:?}").contains("MultilineRecord"));
    }
}
