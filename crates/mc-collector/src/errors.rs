// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the collector pipeline.
//!
//! Every failure in the read → extract → flush pipeline is classified into one of these
//! enums. Only [`CollectorError`] ever stops the collection loop.

use std::path::PathBuf;

/// Failures loading or saving the persisted log cursor.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("Failed to read cursor record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write cursor record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cursor record {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Cursor store unavailable: {0}")]
    Unavailable(String),
}

/// A single snapshot file that could not be turned into an entity snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Failed to read snapshot file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures handing a batch to the sink. All of them leave the batch pending.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    #[error("Sink rejected batch with status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Sink transport error: {0}")]
    Transport(String),

    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems with the death-cause table.
#[derive(Debug, thiserror::Error)]
pub enum DeathCauseError {
    #[error("Failed to read death cause table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed death cause table {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Death cause table {path} has no entries")]
    Empty { path: PathBuf },

    #[error("Death cause table {path}, entry {index}: {reason}")]
    InvalidEntry {
        path: PathBuf,
        index: usize,
        reason: &'static str,
    },
}

/// Conditions that terminate the collection loop.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Unable to persist log cursor after {attempts} attempts: {source}")]
    CursorPersist {
        attempts: u32,
        #[source]
        source: CursorError,
    },

    #[error("Unable to load log cursor: {0}")]
    CursorLoad(#[source] CursorError),

    #[error("Collection task failed: {0}")]
    Task(String),
}
