// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client configuration and the ingest URL derivation.

use std::time::Duration;

use reqwest::Url;

use crate::error::Error;

/// Default capacity of the record queue between producers and the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default number of accumulated records that triggers a flush.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Default period of the timer-driven flush.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1);

/// Default base delay applied before retrying after a failed flush.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Policy applied when a producer enqueues into a full record queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressureMode {
    /// Suspend the producer until the worker frees a slot.
    #[default]
    Block,
    /// Return immediately and discard the record.
    Drop,
}

/// Settings governing the batching pipeline.
///
/// All values are fixed once the client is built; the worker reads them but
/// never mutates them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the ingest service. The client posts to
    /// `{endpoint}/ingest` with any trailing slashes removed first.
    pub endpoint: String,
    /// Capacity of the record queue.
    pub queue_capacity: usize,
    /// Accumulated-record count that triggers an immediate flush.
    pub batch_size: usize,
    /// Period of the timer-driven flush. The timer keeps a fixed period from
    /// worker start; it is not reset by size-triggered flushes.
    pub max_delay: Duration,
    /// Behavior when the record queue is full.
    pub backpressure: BackpressureMode,
    /// Base delay before retrying after a failed flush attempt. Doubles per
    /// consecutive failure, capped at 30s. Zero disables the delay entirely,
    /// retrying on every trigger.
    pub retry_backoff: Duration,
}

impl Config {
    /// Creates a configuration for `endpoint` with all other values at their
    /// defaults.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            max_delay: DEFAULT_MAX_DELAY,
            backpressure: BackpressureMode::default(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Rejects values the pipeline cannot run with.
    ///
    /// A zero queue capacity or a zero timer period would make the underlying
    /// channel and interval constructors panic, so both are surfaced here as
    /// configuration errors instead.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be nonzero".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue capacity must be nonzero".to_string(),
            ));
        }
        if self.max_delay.is_zero() {
            return Err(Error::InvalidConfig("max delay must be nonzero".to_string()));
        }
        Ok(())
    }

    /// Resolves the URL the flusher posts batches to: trailing slashes
    /// stripped from the endpoint, `/ingest` appended.
    pub(crate) fn ingest_url(&self) -> Result<Url, Error> {
        let base = self.endpoint.trim_end_matches('/');
        let url = Url::parse(&format!("{base}/ingest"))
            .map_err(|e| Error::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;
        // Url::parse happily treats "localhost:7280" as scheme "localhost",
        // so an explicit scheme check catches schemeless endpoints too.
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::InvalidEndpoint(format!(
                "{}: unsupported scheme \"{other}\"",
                self.endpoint
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("http://localhost:7280");
        assert_eq!(config.endpoint, "http://localhost:7280");
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.batch_size, 1_000);
        assert_eq!(config.max_delay, Duration::from_secs(1));
        assert_eq!(config.backpressure, BackpressureMode::Block);
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ingest_url_appends_path() {
        let config = Config::new("http://localhost:7280");
        assert_eq!(
            config.ingest_url().unwrap().as_str(),
            "http://localhost:7280/ingest"
        );
    }

    #[test]
    fn test_ingest_url_strips_trailing_slashes() {
        let config = Config::new("http://localhost:7280/");
        assert_eq!(
            config.ingest_url().unwrap().as_str(),
            "http://localhost:7280/ingest"
        );

        let config = Config::new("http://localhost:7280///");
        assert_eq!(
            config.ingest_url().unwrap().as_str(),
            "http://localhost:7280/ingest"
        );
    }

    #[test]
    fn test_ingest_url_preserves_base_path() {
        let config = Config::new("http://localhost:7280/api/v1/test");
        assert_eq!(
            config.ingest_url().unwrap().as_str(),
            "http://localhost:7280/api/v1/test/ingest"
        );
    }

    #[test]
    fn test_ingest_url_rejects_schemeless_endpoint() {
        let config = Config::new("localhost:7280");
        assert!(matches!(
            config.ingest_url(),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_ingest_url_rejects_unsupported_scheme() {
        let config = Config::new("ftp://localhost:7280");
        let err = config.ingest_url().unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_ingest_url_rejects_garbage() {
        let config = Config::new("http://exa mple.com");
        assert!(matches!(
            config.ingest_url(),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::new("http://localhost:7280");
        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::new("http://localhost:7280");
        config.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::new("http://localhost:7280");
        config.max_delay = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_retry_backoff_is_allowed() {
        let mut config = Config::new("http://localhost:7280");
        config.retry_backoff = Duration::ZERO;
        assert!(config.validate().is_ok());
    }
}
