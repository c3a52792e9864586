// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Public client facade: builder, lazy worker startup, enqueue, shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::Auth;
use crate::batch::encode_record;
use crate::config::{BackpressureMode, Config};
use crate::error::Error;
use crate::flusher::Flusher;
use crate::worker::{Command, Worker};

/// Channel ends and shutdown signals for a spawned worker.
#[derive(Debug)]
struct WorkerLink {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    done: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Asynchronous batching client for a JSONL ingest endpoint.
///
/// Records handed to [`ingest`](Self::ingest) are queued, accumulated into
/// batches by a background worker, and posted to `{endpoint}/ingest` as
/// newline-delimited JSON whenever the batch-size threshold is reached or
/// the flush timer fires. Ingestion is fire-and-forget: delivery failures
/// are retried by the worker and reported through diagnostics, never to the
/// calling code.
///
/// The worker spawns lazily on the first ingest (exactly once, however many
/// tasks race the first call) and requires a running tokio runtime. All
/// methods take `&self`, so a client can be shared by reference or `Arc`.
/// Call [`close`](Self::close) before exiting to drain the queue and give
/// buffered records a final flush; a client that is merely dropped flushes
/// on a best-effort basis only.
#[derive(Debug)]
pub struct IngestClient {
    config: Config,
    http: reqwest::Client,
    auth: Auth,
    ingest_url: Url,
    worker: OnceCell<WorkerLink>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl IngestClient {
    /// Starts building a client for `endpoint`.
    pub fn builder(endpoint: impl Into<String>) -> IngestClientBuilder {
        IngestClientBuilder::new(endpoint)
    }

    /// Builds a client for `endpoint` with every knob at its default.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, Error> {
        Self::builder(endpoint).build()
    }

    /// Enqueues one record for delivery.
    ///
    /// The record is encoded to its JSONL line here; what travels through
    /// the queue is the final wire form. Under
    /// [`BackpressureMode::Block`] this call suspends while the queue is
    /// full; under [`BackpressureMode::Drop`] it returns immediately and a
    /// full queue discards the record (counted by
    /// [`dropped_records`](Self::dropped_records)).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Closed`] after [`close`](Self::close), or with an
    /// encoding error when the record cannot be rendered as a single JSON
    /// line. Delivery failures are not errors here.
    pub async fn ingest<T>(&self, record: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        let line = encode_record(record)?;
        self.enqueue(line).await
    }

    /// Enqueues every record in `records`, in order. Stops at the first
    /// failing record.
    pub async fn ingest_all<T, I>(&self, records: I) -> Result<(), Error>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        for record in records {
            self.ingest(&record).await?;
        }
        Ok(())
    }

    /// Forces a flush attempt and completes once it has finished.
    ///
    /// The attempt runs even while retries are being spaced out by backoff.
    /// Like ingestion it carries no delivery outcome; a failed attempt
    /// leaves the records accumulated for retry. Completes immediately when
    /// nothing has ever been enqueued. While the worker has paused queue
    /// intake at the undelivered-record cap, the command waits in the queue
    /// like any record and runs once an automatic attempt succeeds or the
    /// client closes.
    pub async fn flush(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let Some(link) = self.worker.get() else {
            return Ok(());
        };
        let (ack, done) = oneshot::channel();
        link.tx
            .send(Command::Flush(ack))
            .await
            .map_err(|_| Error::Closed)?;
        done.await.map_err(|_| Error::Closed)
    }

    /// Closes the client: no further records are accepted, the queue is
    /// drained, one final flush attempt runs, and the worker stops.
    ///
    /// Completes once the worker has stopped. The first call wins; later
    /// calls return [`Error::Closed`], as does any `ingest` racing the
    /// close. Closing a client whose worker never started is a no-op.
    pub async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        let Some(link) = self.worker.get() else {
            return Ok(());
        };
        link.cancel.cancel();
        let done = link.done.lock().ok().and_then(|mut slot| slot.take());
        if let Some(done) = done {
            // Err here means the worker was already gone, which is fine.
            let _ = done.await;
        }
        Ok(())
    }

    /// Number of records discarded because the queue was full under
    /// [`BackpressureMode::Drop`].
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn enqueue(&self, line: String) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let link = self.link().await;
        // close() may have run between the check above and the spawn; it saw
        // no worker to cancel, so cancel the fresh one here and fail closed.
        if self.closed.load(Ordering::Acquire) {
            link.cancel.cancel();
            return Err(Error::Closed);
        }
        match self.config.backpressure {
            BackpressureMode::Block => link
                .tx
                .send(Command::Record(line))
                .await
                .map_err(|_| Error::Closed),
            BackpressureMode::Drop => match link.tx.try_send(Command::Record(line)) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Record queue full, dropping record");
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(Error::Closed),
            },
        }
    }

    /// Returns the spawned worker, starting it on first use. `OnceCell`
    /// guarantees a single spawn even when first calls race; the init block
    /// has no await points, so it cannot be torn by cancellation.
    async fn link(&self) -> &WorkerLink {
        self.worker
            .get_or_init(|| async {
                let (tx, rx) = mpsc::channel(self.config.queue_capacity);
                let cancel = CancellationToken::new();
                let (done_tx, done_rx) = oneshot::channel();
                let flusher = Flusher::new(
                    self.http.clone(),
                    self.ingest_url.clone(),
                    self.auth.clone(),
                );
                let worker = Worker::new(rx, cancel.clone(), done_tx, flusher, &self.config);
                tokio::spawn(worker.run());
                debug!("Spawned ingest worker for {}", self.config.endpoint);
                WorkerLink {
                    tx,
                    cancel,
                    done: Mutex::new(Some(done_rx)),
                }
            })
            .await
    }
}

/// Builder for [`IngestClient`].
///
/// Every knob is fixed at [`build`](Self::build) time; there is no way to
/// reconfigure a client once it exists, so the worker always reads a frozen
/// configuration.
#[derive(Debug)]
pub struct IngestClientBuilder {
    config: Config,
    http: Option<reqwest::Client>,
    auth: Auth,
}

impl IngestClientBuilder {
    fn new(endpoint: impl Into<String>) -> Self {
        Self::from_config(Config::new(endpoint))
    }

    /// Starts from a prepared [`Config`] instead of the individual setters.
    /// Transport and auth are not part of `Config` and keep their defaults
    /// until set here.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            http: None,
            auth: Auth::None,
        }
    }

    /// Capacity of the record queue (default 10,000).
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Accumulated-record count that triggers an immediate flush
    /// (default 1,000).
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Period of the timer-driven flush (default 1s). The timer is periodic
    /// from worker start and is not reset by size-triggered flushes.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Policy applied when the record queue is full (default
    /// [`BackpressureMode::Block`]).
    #[must_use]
    pub fn backpressure(mut self, mode: BackpressureMode) -> Self {
        self.config.backpressure = mode;
        self
    }

    /// Base delay before retrying a failed flush (default 250ms, doubling
    /// per consecutive failure). Zero retries on every trigger.
    #[must_use]
    pub fn retry_backoff(mut self, base: Duration) -> Self {
        self.config.retry_backoff = base;
        self
    }

    /// HTTP transport to send with. Supply a preconfigured
    /// `reqwest::Client` to control pooling, timeouts, TLS, or proxies; it
    /// may be shared with other clients.
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Credential decorator applied to every flush attempt (default none).
    #[must_use]
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Validates the configuration and builds the client.
    ///
    /// The worker is not started here; it spawns on the first ingest.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEndpoint`] when the endpoint does not parse as an
    /// http(s) URL, [`Error::InvalidConfig`] for unusable knob values or a
    /// transport that fails to initialize.
    pub fn build(self) -> Result<IngestClient, Error> {
        self.config.validate()?;
        let ingest_url = self.config.ingest_url()?;
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP transport: {e}")))?,
        };
        Ok(IngestClient {
            config: self.config,
            http,
            auth: self.auth,
            ingest_url,
            worker: OnceCell::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        })
    }
}
