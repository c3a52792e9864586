// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background worker owning the batching loop.
//!
//! One worker task per client. The loop selects over three events:
//!
//! ```text
//!   record queue ──► append; flush when the batch-size threshold is hit
//!   timer tick   ──► flush whatever has accumulated (no-op when empty)
//!   cancellation ──► drain the queue, one final flush, stop
//! ```
//!
//! The timer keeps a fixed period from worker start; a size-triggered flush
//! does not reset it. Failed flushes leave the accumulator untouched so the
//! next trigger re-sends the same records; the worker spaces those retries
//! with an exponential backoff and pauses queue intake once the accumulator
//! holds [`MAX_PENDING_BATCHES`] batches of undelivered records, turning a
//! persistent endpoint failure into ordinary producer backpressure.
//!
//! The lifecycle is encoded by the loop itself: not yet spawned, running,
//! draining after cancellation, stopped once `run` returns. Stopped is
//! terminal.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::batch::Batch;
use crate::config::Config;
use crate::flusher::{FlushOutcome, Flusher};

/// Messages carried by the record queue.
#[derive(Debug)]
pub(crate) enum Command {
    /// One encoded record.
    Record(String),
    /// Force a flush attempt and acknowledge once it has finished.
    Flush(oneshot::Sender<()>),
}

/// Cap on undelivered records held by the worker, in batches. Past this the
/// worker stops draining the queue until a flush succeeds.
const MAX_PENDING_BATCHES: usize = 4;

/// Ceiling for the retry backoff.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Retry spacing after failed flushes.
///
/// Backoff formula: `base * 2^(failures - 1)`, capped at
/// [`MAX_RETRY_BACKOFF`]. With the default 250ms base: 250ms, 500ms, 1s, 2s,
/// ... Automatic triggers (size threshold, timer tick) skip their attempt
/// while the deadline lies in the future; explicit flushes and the final
/// shutdown flush ignore it.
#[derive(Debug)]
struct RetryState {
    base: Duration,
    consecutive_failures: u32,
    next_attempt: Option<Instant>,
}

impl RetryState {
    fn new(base: Duration) -> Self {
        Self {
            base,
            consecutive_failures: 0,
            next_attempt: None,
        }
    }

    /// Whether an automatic trigger may attempt a flush now.
    fn ready(&self) -> bool {
        match self.next_attempt {
            None => true,
            Some(at) => Instant::now() >= at,
        }
    }

    fn backoff_delay(&self) -> Duration {
        let exponent = self.consecutive_failures.saturating_sub(1).min(10);
        self.base
            .saturating_mul(1 << exponent)
            .min(MAX_RETRY_BACKOFF)
    }

    fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_attempt = Some(Instant::now() + self.backoff_delay());
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.next_attempt = None;
    }
}

/// The background task behind an `IngestClient`.
pub(crate) struct Worker {
    rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    done: oneshot::Sender<()>,
    flusher: Flusher,
    batch: Batch,
    batch_size: usize,
    max_delay: Duration,
    max_pending: usize,
    retry: RetryState,
}

impl Worker {
    pub(crate) fn new(
        rx: mpsc::Receiver<Command>,
        cancel: CancellationToken,
        done: oneshot::Sender<()>,
        flusher: Flusher,
        config: &Config,
    ) -> Self {
        Self {
            rx,
            cancel,
            done,
            flusher,
            batch: Batch::with_capacity(config.batch_size),
            batch_size: config.batch_size,
            max_delay: config.max_delay,
            max_pending: config.batch_size.saturating_mul(MAX_PENDING_BATCHES),
            retry: RetryState::new(config.retry_backoff),
        }
    }

    /// Runs until cancellation, until every sender is dropped, or until a
    /// flush fails fatally.
    pub(crate) async fn run(mut self) {
        debug!("Ingest worker started");
        let mut ticker = tokio::time::interval(self.max_delay);
        // Skipping missed ticks keeps the fixed-period grid when an HTTP
        // call outlasts a period, instead of bursting catch-up flushes.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; discard it.
        ticker.tick().await;

        loop {
            tokio::select! {
                command = self.rx.recv(), if self.batch.len() < self.max_pending => {
                    match command {
                        Some(Command::Record(line)) => {
                            self.batch.push(line);
                            if self.batch.len() >= self.batch_size
                                && self.retry.ready()
                                && self.flush_once().await.is_fatal()
                            {
                                break;
                            }
                        }
                        Some(Command::Flush(ack)) => {
                            let outcome = self.flush_once().await;
                            let _ = ack.send(());
                            if outcome.is_fatal() {
                                break;
                            }
                        }
                        None => {
                            // Every handle dropped without close(); run the
                            // same final flush, best effort.
                            let _ = self.flush_once().await;
                            break;
                        }
                    }
                }
                () = self.cancel.cancelled() => {
                    debug!("Ingest worker draining before shutdown");
                    // Reject further sends; records already queued stay
                    // readable below.
                    self.rx.close();
                    let deferred = self.drain();
                    let _ = self.flush_once().await;
                    for ack in deferred {
                        let _ = ack.send(());
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if !self.batch.is_empty()
                        && self.retry.ready()
                        && self.flush_once().await.is_fatal()
                    {
                        break;
                    }
                }
            }
        }

        if !self.batch.is_empty() {
            warn!(
                "{} records were not delivered before shutdown",
                self.batch.len()
            );
        }
        let _ = self.done.send(());
        debug!("Ingest worker stopped");
    }

    /// One flush attempt. The accumulator is cleared only on delivery; a
    /// retriable failure arms the backoff instead.
    async fn flush_once(&mut self) -> FlushOutcome {
        if self.batch.is_empty() {
            return FlushOutcome::Delivered;
        }
        let outcome = self.flusher.flush(&self.batch).await;
        match outcome {
            FlushOutcome::Delivered => {
                self.batch.clear();
                self.retry.record_success();
            }
            FlushOutcome::Retriable => self.retry.record_failure(),
            FlushOutcome::Fatal => {
                error!("Stopping ingest worker; the ingest request cannot be constructed");
            }
        }
        outcome
    }

    /// Moves whatever is still queued into the accumulator. Acks for queued
    /// flush commands are handed back so they fire after the final flush.
    fn drain(&mut self) -> Vec<oneshot::Sender<()>> {
        let mut deferred = Vec::new();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Record(line) => self.batch.push(line),
                Command::Flush(ack) => deferred.push(ack),
            }
        }
        deferred
    }
}
