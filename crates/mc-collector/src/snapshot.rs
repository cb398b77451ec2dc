// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Aggregation of per-entity counter snapshot files.
//!
//! Each `<entity-id>.json` file in the snapshot directory holds the entity's complete current
//! counters as `category → subkey → integer`, fully rewritten by the game server. Nothing is
//! diffed against earlier cycles; every snapshot carries absolute totals.
//!
//! Categories are never hardcoded: whatever categories and subkeys the file contains are
//! summed, so counters added by newer server versions are picked up without code changes.

use crate::errors::SnapshotError;
use crate::identity::IdentityMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `category → subkey → value`
pub type Counters = BTreeMap<String, BTreeMap<String, i64>>;

const SNAPSHOT_EXTENSION: &str = "json";

/// Full current counter state of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub display_name: String,
    pub captured_at: DateTime<Utc>,
    pub counters: Counters,
    /// Sum of every subkey within each category.
    pub totals: BTreeMap<String, i64>,
}

impl EntitySnapshot {
    pub fn new(
        entity_id: String,
        display_name: String,
        captured_at: DateTime<Utc>,
        counters: Counters,
    ) -> Self {
        let totals = counters
            .iter()
            .map(|(category, subkeys)| {
                let total = subkeys.values().fold(0i64, |acc, v| acc.saturating_add(*v));
                (category.clone(), total)
            })
            .collect();
        EntitySnapshot {
            entity_id,
            display_name,
            captured_at,
            counters,
            totals,
        }
    }

    pub fn category_total(&self, category: &str) -> Option<i64> {
        self.totals.get(category).copied()
    }

    pub fn counter(&self, category: &str, subkey: &str) -> Option<i64> {
        self.counters.get(category)?.get(subkey).copied()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotDocument {
    Wrapped { stats: Counters },
    Bare(Counters),
}

impl SnapshotDocument {
    fn into_counters(self) -> Counters {
        match self {
            SnapshotDocument::Wrapped { stats } => stats,
            SnapshotDocument::Bare(counters) => counters,
        }
    }
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateReport {
    pub snapshots: Vec<EntitySnapshot>,
    /// Files that could not be read or parsed this cycle.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct SnapshotAggregator {
    snapshot_dir: PathBuf,
    identity_registry: PathBuf,
}

impl SnapshotAggregator {
    pub fn new(snapshot_dir: impl Into<PathBuf>, identity_registry: impl Into<PathBuf>) -> Self {
        SnapshotAggregator {
            snapshot_dir: snapshot_dir.into(),
            identity_registry: identity_registry.into(),
        }
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// Reloads the identity registry and aggregates every snapshot file.
    pub fn aggregate(&self, captured_at: DateTime<Utc>) -> io::Result<AggregateReport> {
        let identities = IdentityMap::load(&self.identity_registry);
        self.aggregate_with(&identities, captured_at)
    }

    /// Aggregates every snapshot file, resolving names through `identities`.
    ///
    /// A missing directory is an empty report. Individual unreadable or malformed files are
    /// skipped with a warning and counted in [`AggregateReport::skipped`].
    pub fn aggregate_with(
        &self,
        identities: &IdentityMap,
        captured_at: DateTime<Utc>,
    ) -> io::Result<AggregateReport> {
        let entries = match fs::read_dir(&self.snapshot_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    "Snapshot directory {} does not exist yet",
                    self.snapshot_dir.display()
                );
                return Ok(AggregateReport::default());
            }
            Err(e) => return Err(e),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(SNAPSHOT_EXTENSION)
            })
            .collect();
        paths.sort();

        let mut report = AggregateReport::default();
        for path in paths {
            let Some(entity_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warn!("Skipping snapshot file with non UTF-8 name: {}", path.display());
                report.skipped += 1;
                continue;
            };
            let display_name = identities.resolve(entity_id).to_string();
            match read_snapshot_file(&path, entity_id.to_string(), display_name, captured_at) {
                Ok(snapshot) => report.snapshots.push(snapshot),
                Err(e) => {
                    warn!("Skipping snapshot: {e}");
                    report.skipped += 1;
                }
            }
        }

        debug!(
            "Aggregated {} snapshots from {} ({} skipped)",
            report.snapshots.len(),
            self.snapshot_dir.display(),
            report.skipped
        );
        Ok(report)
    }
}

/// Reads one snapshot file and computes its category totals.
pub fn read_snapshot_file(
    path: &Path,
    entity_id: String,
    display_name: String,
    captured_at: DateTime<Utc>,
) -> Result<EntitySnapshot, SnapshotError> {
    let contents = fs::read(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: SnapshotDocument =
        serde_json::from_slice(&contents).map_err(|source| SnapshotError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(EntitySnapshot::new(
        entity_id,
        display_name,
        captured_at,
        normalize(document.into_counters()),
    ))
}

/// Strips one leading namespace from categories and subkeys, merging keys that collide.
fn normalize(raw: Counters) -> Counters {
    let mut counters = Counters::new();
    for (category, subkeys) in raw {
        let values = counters
            .entry(strip_namespace(&category).to_string())
            .or_default();
        for (subkey, value) in subkeys {
            let slot = values.entry(strip_namespace(&subkey).to_string()).or_insert(0);
            *slot = slot.saturating_add(value);
        }
    }
    counters
}

fn strip_namespace(key: &str) -> &str {
    key.split_once(':').map_or(key, |(_, name)| name)
}
