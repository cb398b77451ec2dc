// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    uuid: String,
    name: String,
}

/// Opaque entity id to display name, reloaded every cycle from the server's user cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    names: HashMap<String, String>,
}

impl IdentityMap {
    /// Loads the registry at `path`. A missing or malformed registry yields an empty map.
    pub fn load(path: &Path) -> Self {
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Identity registry {} not found", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read identity registry {}: {e}", path.display());
                return Self::default();
            }
        };

        match serde_json::from_slice::<Vec<RegistryEntry>>(&contents) {
            Ok(entries) => entries
                .into_iter()
                .map(|entry| (entry.uuid, entry.name))
                .collect(),
            Err(e) => {
                warn!("Malformed identity registry {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Display name for `id`, or `id` itself when unmapped.
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.names.get(id).map_or(id, String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<(String, String)> for IdentityMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        IdentityMap {
            names: iter.into_iter().collect(),
        }
    }
}
