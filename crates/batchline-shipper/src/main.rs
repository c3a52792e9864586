// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, time::Duration};

use serde_json::value::RawValue;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use batchline::{Auth, IngestClient, DEFAULT_BATCH_SIZE, DEFAULT_MAX_DELAY, DEFAULT_QUEUE_CAPACITY};

/// Shipper settings, read from `BATCHLINE_*` environment variables.
#[derive(Debug)]
struct ShipperConfig {
    endpoint: String,
    token: Option<String>,
    batch_size: usize,
    max_delay: Duration,
    queue_capacity: usize,
}

impl ShipperConfig {
    fn from_env() -> Result<ShipperConfig, Box<dyn std::error::Error>> {
        let endpoint = env::var("BATCHLINE_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("BATCHLINE_ENDPOINT environment variable is not set"))?;
        let token = env::var("BATCHLINE_TOKEN").ok();
        let batch_size = env::var("BATCHLINE_BATCH_SIZE")
            .ok()
            .and_then(|size| size.parse::<usize>().ok())
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let max_delay = env::var("BATCHLINE_MAX_DELAY_MS")
            .ok()
            .and_then(|millis| millis.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MAX_DELAY);
        let queue_capacity = env::var("BATCHLINE_QUEUE_CAPACITY")
            .ok()
            .and_then(|capacity| capacity.parse::<usize>().ok())
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        Ok(ShipperConfig {
            endpoint,
            token,
            batch_size,
            max_delay,
            queue_capacity,
        })
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("BATCHLINE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match ShipperConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error reading configuration on shipper startup: {e}");
            return;
        }
    };

    let mut builder = IngestClient::builder(&config.endpoint)
        .batch_size(config.batch_size)
        .max_delay(config.max_delay)
        .queue_capacity(config.queue_capacity);
    if let Some(token) = &config.token {
        builder = builder.auth(Auth::bearer(token));
    }
    let client = match builder.build() {
        Ok(client) => client,
        Err(e) => {
            error!("Error creating ingest client on shipper startup: {e}");
            return;
        }
    };

    info!("Shipping records from stdin to {}", config.endpoint);

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut shipped: u64 = 0;
    let mut skipped: u64 = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                // Validated but not re-parsed: the raw text of the line is
                // what gets shipped.
                let record = match serde_json::from_str::<&RawValue>(&line) {
                    Ok(record) => record,
                    Err(e) => {
                        skipped += 1;
                        warn!("Skipping line that is not valid JSON: {e}");
                        continue;
                    }
                };
                match client.ingest(record).await {
                    Ok(()) => shipped += 1,
                    Err(e) => {
                        error!("Error enqueueing record: {e}");
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Error reading from stdin: {e}");
                break;
            }
        }
    }

    debug!("Input exhausted, draining the record queue");
    if let Err(e) = client.close().await {
        error!("Error closing ingest client: {e}");
    }
    let dropped = client.dropped_records();
    info!("Shipped {shipped} records ({skipped} invalid lines skipped, {dropped} dropped)");
}
