// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Offset-tracked reader for an append-only, rotation-prone log file.
//!
//! Each read starts at the cursor, returns only complete lines and reports the cursor that
//! would follow them. Persisting that cursor is left to the caller so it can be delayed until
//! the extracted events reached the sink.

use crate::cursor::Cursor;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bytes consumed by one read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    /// Complete, newline-terminated lines. Never ends in a partial line.
    pub bytes: Vec<u8>,
    /// Cursor to commit once `bytes` have been handled.
    pub next: Cursor,
    /// The file was truncated or replaced since the cursor was taken.
    pub rotated: bool,
}

impl ReadChunk {
    fn unchanged(cursor: &Cursor) -> Self {
        ReadChunk {
            bytes: Vec::new(),
            next: *cursor,
            rotated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lines without their terminator, decoded lossily.
    pub fn lines(&self) -> impl Iterator<Item = Cow<'_, str>> {
        let body = self.bytes.strip_suffix(b"\n").unwrap_or(&self.bytes);
        let lines = if self.bytes.is_empty() {
            None
        } else {
            Some(body.split(|&b| b == b'\n'))
        };
        lines.into_iter().flatten().map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line)
        })
    }
}

#[derive(Debug, Clone)]
pub struct LogReader {
    path: PathBuf,
}

impl LogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LogReader { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every complete line appended since `cursor`.
    ///
    /// A missing file yields an empty chunk and the same cursor. A file shorter than the cursor
    /// offset, or one with a different identity, is read again from the start.
    pub fn read_new_bytes(&self, cursor: &Cursor) -> io::Result<ReadChunk> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Log file {} does not exist yet", self.path.display());
                return Ok(ReadChunk::unchanged(cursor));
            }
            Err(e) => return Err(e),
        };

        let metadata = file.metadata()?;
        let len = metadata.len();
        let identity = file_identity(&metadata);

        let replaced = matches!(
            (cursor.file_identity, identity),
            (Some(stored), Some(current)) if stored != current
        );
        let rotated = replaced || len < cursor.byte_offset;
        let start = if rotated {
            info!(
                "Log file {} was rotated (offset {}, length {}, replaced: {}), reading from start",
                self.path.display(),
                cursor.byte_offset,
                len,
                replaced
            );
            0
        } else {
            cursor.byte_offset
        };

        file.seek(SeekFrom::Start(start))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let complete = bytes
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        if complete < bytes.len() {
            debug!(
                "Holding back {} bytes of partial line in {}",
                bytes.len() - complete,
                self.path.display()
            );
        }
        bytes.truncate(complete);

        Ok(ReadChunk {
            next: Cursor::new(identity, start + complete as u64),
            bytes,
            rotated,
        })
    }
}

#[cfg(unix)]
fn file_identity(metadata: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_identity(_metadata: &fs::Metadata) -> Option<u64> {
    None
}
