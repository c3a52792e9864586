// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch delivery over HTTP.

use reqwest::{Client, Url};
use tracing::{debug, error};

use crate::auth::Auth;
use crate::batch::Batch;

/// Result of one flush attempt.
///
/// Whether the accumulator may be cleared is decided here and nowhere else;
/// the worker acts on the returned variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    /// The endpoint accepted the batch; the records count as delivered.
    Delivered,
    /// Transport error or non-success status. The accumulator is retained
    /// unchanged and re-sent on a later trigger.
    Retriable,
    /// The request could not be constructed. Deterministic, so retrying
    /// cannot succeed; the worker stops after reporting it.
    Fatal,
}

impl FlushOutcome {
    pub(crate) fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }
}

/// Sends accumulated batches to the ingest endpoint.
pub(crate) struct Flusher {
    http: Client,
    ingest_url: Url,
    auth: Auth,
}

impl Flusher {
    pub(crate) fn new(http: Client, ingest_url: Url, auth: Auth) -> Self {
        Self {
            http,
            ingest_url,
            auth,
        }
    }

    /// Performs one delivery attempt for `batch`.
    ///
    /// The payload is rebuilt from the retained lines and the auth decorator
    /// is re-applied on every call, so a retried batch goes out with
    /// identical bytes and current credentials. The response body is read to
    /// completion on both paths so the transport can reuse the connection.
    pub(crate) async fn flush(&self, batch: &Batch) -> FlushOutcome {
        if batch.is_empty() {
            return FlushOutcome::Delivered;
        }

        let request = self.http.post(self.ingest_url.clone()).body(batch.to_ndjson());
        let request = self.auth.decorate(request);

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let _ = response.bytes().await;
                    debug!("Delivered batch of {} records", batch.len());
                    FlushOutcome::Delivered
                } else {
                    let body = response.text().await.unwrap_or_default();
                    error!(
                        "Endpoint returned {status}, retaining {} records for retry: {body}",
                        batch.len()
                    );
                    FlushOutcome::Retriable
                }
            }
            Err(e) if e.is_builder() => {
                error!("Could not construct ingest request: {e}");
                FlushOutcome::Fatal
            }
            Err(e) => {
                error!(
                    "Failed to send batch of {} records, retaining for retry: {e}",
                    batch.len()
                );
                FlushOutcome::Retriable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::encode_record;
    use tracing_test::traced_test;

    fn batch_of(values: &[&str]) -> Batch {
        let mut batch = Batch::with_capacity(values.len());
        for value in values {
            batch.push(encode_record(&serde_json::json!({ "s": value })).unwrap());
        }
        batch
    }

    fn flusher_for(url: &str, auth: Auth) -> Flusher {
        let ingest_url = Url::parse(&format!("{url}/ingest")).unwrap();
        Flusher::new(Client::new(), ingest_url, auth)
    }

    #[tokio::test]
    async fn test_flush_success_posts_ndjson_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_body(mockito::Matcher::Exact(
                "{\"s\":\"a\"}\n{\"s\":\"b\"}\n".to_string(),
            ))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let flusher = flusher_for(&server.url(), Auth::None);
        let outcome = flusher.flush(&batch_of(&["a", "b"])).await;

        assert_eq!(outcome, FlushOutcome::Delivered);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_flush_applies_auth_on_each_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_header("authorization", "Bearer token-1")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let flusher = flusher_for(&server.url(), Auth::bearer("token-1"));
        assert_eq!(flusher.flush(&batch_of(&["a"])).await, FlushOutcome::Delivered);
        assert_eq!(flusher.flush(&batch_of(&["b"])).await, FlushOutcome::Delivered);
        mock.assert_async().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_flush_non_success_status_is_retriable() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .with_status(500)
            .with_body("{\"error\":\"overloaded\"}")
            .expect(1)
            .create_async()
            .await;

        let flusher = flusher_for(&server.url(), Auth::None);
        let outcome = flusher.flush(&batch_of(&["a"])).await;

        assert_eq!(outcome, FlushOutcome::Retriable);
        mock.assert_async().await;
        assert!(logs_contain("for retry"));
        assert!(logs_contain("overloaded"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_flush_transport_error_is_retriable() {
        // Nothing listens on port 1.
        let flusher = flusher_for("http://127.0.0.1:1", Auth::None);
        let outcome = flusher.flush(&batch_of(&["a"])).await;

        assert_eq!(outcome, FlushOutcome::Retriable);
        assert!(logs_contain("Failed to send batch"));
    }

    #[tokio::test]
    async fn test_flush_invalid_decoration_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .expect(0)
            .create_async()
            .await;

        // A header name with a space poisons the request builder.
        let auth = Auth::custom(|request| request.header("bad header", "v"));
        let flusher = flusher_for(&server.url(), auth);
        let outcome = flusher.flush(&batch_of(&["a"])).await;

        assert_eq!(outcome, FlushOutcome::Fatal);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_flush_empty_batch_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .expect(0)
            .create_async()
            .await;

        let flusher = flusher_for(&server.url(), Auth::None);
        let outcome = flusher.flush(&Batch::with_capacity(4)).await;

        assert_eq!(outcome, FlushOutcome::Delivered);
        mock.assert_async().await;
    }
}
