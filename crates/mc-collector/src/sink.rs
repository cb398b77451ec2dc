// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink writers: the boundary where batches leave the collector.
//!
//! Sinks are assumed to tolerate duplicate delivery (rows carry an `insert_id`). A failed
//! write never drops anything; the collection loop keeps the batch and retries it.

use crate::config::SinkConfig;
use crate::errors::SinkError;
use crate::http_utils::build_client;
use crate::record::Batch;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const API_KEY_HEADER: &str = "X-Api-Key";

#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Delivers the whole batch, or reports why it could not.
    async fn write(&self, batch: &Batch) -> Result<(), SinkError>;
}

pub struct HttpSinkConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub https_proxy: Option<String>,
    pub timeout: Duration,
    /// zstd level; `None` sends the body uncompressed.
    pub compression_level: Option<i32>,
}

/// POSTs newline-delimited JSON rows to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    compression_level: Option<i32>,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let client = build_client(config.https_proxy.as_deref(), config.timeout)
            .map_err(|e| SinkError::Transport(format!("Unable to build HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE));
        if config.compression_level.is_some() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }
        if let Some(api_key) = config.api_key.as_deref() {
            let value = HeaderValue::from_str(api_key)
                .map_err(|e| SinkError::Payload(format!("Invalid API key header: {e}")))?;
            headers.insert(API_KEY_HEADER, value);
        }

        Ok(HttpSink {
            client,
            url: config.url,
            headers,
            compression_level: config.compression_level,
        })
    }

    fn encode(&self, batch: &Batch) -> Result<Vec<u8>, SinkError> {
        let body = batch
            .to_ndjson()
            .map_err(|e| SinkError::Payload(e.to_string()))?;
        match self.compression_level {
            Some(level) => zstd::encode_all(body.as_slice(), level)
                .map_err(|e| SinkError::Payload(format!("Failed to compress payload: {e}"))),
            None => Ok(body),
        }
    }
}

#[async_trait]
impl SinkWriter for HttpSink {
    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        let body = self.encode(batch)?;
        let time = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        let elapsed = time.elapsed();

        let status = response.status();
        if status.is_success() {
            debug!(
                "Sink | Delivered {} events and {} snapshots in {} ms",
                batch.events.len(),
                batch.snapshots.len(),
                elapsed.as_millis()
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!("Sink | Request failed with status {status}: {body:?}");
        Err(SinkError::Status { status, body })
    }
}

/// Appends newline-delimited JSON rows to a local file, syncing after every batch.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSink { path: path.into() }
    }
}

#[async_trait]
impl SinkWriter for FileSink {
    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        let body = batch
            .to_ndjson()
            .map_err(|e| SinkError::Payload(e.to_string()))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(&body)?;
            file.sync_data()
        })
        .await
        .map_err(|e| SinkError::Transport(format!("File sink task failed: {e}")))??;
        Ok(())
    }
}

/// Builds the sink selected by configuration.
pub fn build_sink(config: &SinkConfig) -> Result<Arc<dyn SinkWriter>, SinkError> {
    match config {
        SinkConfig::Http {
            url,
            api_key,
            timeout,
            compression_level,
            https_proxy,
        } => Ok(Arc::new(HttpSink::new(HttpSinkConfig {
            url: url.clone(),
            api_key: api_key.clone(),
            https_proxy: https_proxy.clone(),
            timeout: *timeout,
            compression_level: *compression_level,
        })?)),
        SinkConfig::File { path } => Ok(Arc::new(FileSink::new(path.clone()))),
    }
}
