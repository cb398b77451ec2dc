// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persisted position in the tailed log file.
//!
//! The cursor is an explicit value handed to and returned from the reader; persistence goes
//! through the [`CursorStore`] trait so the collection loop can be exercised with an in-memory
//! store.

use crate::errors::CursorError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// How much of the log file has been consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Inode of the file the offset belongs to. `None` when unknown (legacy records, non-unix).
    pub file_identity: Option<u64>,
    /// Offset just past the last complete line handed out.
    pub byte_offset: u64,
}

impl Cursor {
    pub fn new(file_identity: Option<u64>, byte_offset: u64) -> Self {
        Cursor {
            file_identity,
            byte_offset,
        }
    }
}

/// Durable storage for a single [`Cursor`].
pub trait CursorStore: Send + Sync {
    /// Returns `None` when nothing was persisted yet.
    fn load(&self) -> Result<Option<Cursor>, CursorError>;
    fn save(&self, cursor: &Cursor) -> Result<(), CursorError>;
}

/// Stores the cursor as a small JSON record, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCursorStore { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_atomically(&self, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Result<Option<Cursor>, CursorError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No cursor record at {}, starting from 0", self.path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(CursorError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let trimmed = contents.trim();
        // Older deployments stored the bare offset
        if let Ok(byte_offset) = trimmed.parse::<u64>() {
            return Ok(Some(Cursor::new(None, byte_offset)));
        }

        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| CursorError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn save(&self, cursor: &Cursor) -> Result<(), CursorError> {
        let body = serde_json::to_vec(cursor).map_err(|e| CursorError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        self.write_atomically(&body)
            .map_err(|source| CursorError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// In-memory store, cloneable so a test can keep a handle while the collector owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    cursor: Arc<Mutex<Option<Cursor>>>,
    failing_saves: Arc<AtomicU32>,
    saves: Arc<AtomicU32>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(cursor: Cursor) -> Self {
        let store = Self::default();
        if let Ok(mut guard) = store.cursor.lock() {
            *guard = Some(cursor);
        }
        store
    }

    /// Makes the next `n` calls to `save` fail.
    pub fn fail_next_saves(&self, n: u32) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Option<Cursor> {
        self.cursor.lock().ok().and_then(|guard| *guard)
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<Option<Cursor>, CursorError> {
        self.cursor
            .lock()
            .map(|guard| *guard)
            .map_err(|e| CursorError::Unavailable(e.to_string()))
    }

    fn save(&self, cursor: &Cursor) -> Result<(), CursorError> {
        let remaining = self.failing_saves.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_saves.store(remaining - 1, Ordering::SeqCst);
            return Err(CursorError::Unavailable("injected failure".to_string()));
        }
        let mut guard = self
            .cursor
            .lock()
            .map_err(|e| CursorError::Unavailable(e.to_string()))?;
        *guard = Some(*cursor);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
