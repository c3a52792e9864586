// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous batching client for newline-delimited JSON ingest endpoints.
//!
//! Producers hand records to an [`IngestClient`]; a background worker
//! accumulates them and posts each batch to `{endpoint}/ingest` when either
//! the batch-size threshold is reached or the flush timer fires. A batch
//! the endpoint did not accept is kept and re-sent on a later trigger, so
//! delivery is at-least-once while the process lives; ingestion itself is
//! fire-and-forget.
//!
//! ```no_run
//! use batchline::{Auth, IngestClient};
//! use serde::Serialize;
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct Event<'a> {
//!     s: &'a str,
//! }
//!
//! # async fn run() -> Result<(), batchline::Error> {
//! let client = IngestClient::builder("http://localhost:7280/api/v1/test")
//!     .batch_size(2)
//!     .max_delay(Duration::from_millis(50))
//!     .auth(Auth::bearer("token"))
//!     .build()?;
//!
//! client.ingest(&Event { s: "a" }).await?;
//! client.ingest(&Event { s: "b" }).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

/// Request authentication decorators.
mod auth;

/// Record encoding and the batch accumulator.
mod batch;

/// The public client facade and its builder.
mod client;

/// Configuration values and validation.
mod config;

/// Crate error type.
mod error;

/// HTTP delivery of accumulated batches.
mod flusher;

/// The background batching worker.
mod worker;

pub use auth::{Auth, AuthFn};
pub use client::{IngestClient, IngestClientBuilder};
pub use config::{
    BackpressureMode, Config, DEFAULT_BATCH_SIZE, DEFAULT_MAX_DELAY, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RETRY_BACKOFF,
};
pub use error::Error;
