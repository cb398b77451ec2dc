// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Versioned table of death message fragments.
//!
//! A death line reads `<player> <fragment>[ <rest>]`. The fragment must follow the player name
//! directly, so chat text that merely mentions dying is never counted. The built-in table tracks
//! the vanilla death messages; deployments can replace it with a JSON document:
//!
//! ```json
//! { "version": 2, "causes": [ { "fragment": "was slain by", "cause": "combat", "captures_killer": true } ] }
//! ```

use crate::errors::DeathCauseError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const BUILTIN_TABLE_VERSION: u32 = 1;

// (fragment, cause, captures_killer)
const BUILTIN_DEATH_CAUSES: &[(&str, &str, bool)] = &[
    ("was shot by", "combat", true),
    ("was pummeled by", "combat", true),
    ("was slain by", "combat", true),
    ("was killed by", "combat", true),
    ("was killed by magic", "magic", false),
    ("was killed by even more magic", "magic", false),
    ("was killed trying to hurt", "combat", true),
    ("was impaled by", "combat", true),
    ("was stung to death", "combat", false),
    ("was obliterated by a sonically-charged shriek", "combat", false),
    ("was fireballed by", "fire", true),
    ("walked into fire", "fire", false),
    ("went up in flames", "fire", false),
    ("burned to death", "fire", false),
    ("was burnt to a crisp", "fire", false),
    ("tried to swim in lava", "lava", false),
    ("discovered the floor was lava", "lava", false),
    ("drowned", "drowning", false),
    ("blew up", "explosion", false),
    ("was blown up by", "explosion", true),
    ("went off with a bang", "explosion", false),
    ("hit the ground too hard", "fall", false),
    ("fell from a high place", "fall", false),
    ("fell off", "fall", false),
    ("fell while", "fall", false),
    ("was doomed to fall", "fall", false),
    ("experienced kinetic energy", "kinetic", false),
    ("fell out of the world", "void", false),
    ("didn't want to live in the same world as", "void", true),
    ("left the confines of this world", "void", false),
    ("was pricked to death", "contact", false),
    ("walked into a cactus", "contact", false),
    ("was poked to death by", "contact", false),
    ("was impaled on a stalagmite", "contact", false),
    ("was skewered by", "contact", false),
    ("was squashed by", "crushing", false),
    ("was squished", "crushing", false),
    ("suffocated in a wall", "suffocation", false),
    ("starved to death", "starvation", false),
    ("froze to death", "freezing", false),
    ("was frozen to death by", "freezing", true),
    ("was struck by lightning", "lightning", false),
    ("withered away", "wither", false),
    ("was roasted in dragon's breath", "magic", false),
    ("died", "other", false),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathCause {
    pub fragment: String,
    pub cause: String,
    #[serde(default)]
    pub captures_killer: bool,
}

/// A matched death phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathMatch<'a> {
    pub cause: &'a str,
    pub killer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeathCauseTable {
    version: u32,
    causes: Vec<DeathCause>,
}

impl DeathCauseTable {
    pub fn new(version: u32, mut causes: Vec<DeathCause>) -> Self {
        // Longest first so "was killed by magic" wins over "was killed by"
        causes.sort_by(|a, b| b.fragment.len().cmp(&a.fragment.len()));
        DeathCauseTable { version, causes }
    }

    pub fn builtin() -> Self {
        let causes = BUILTIN_DEATH_CAUSES
            .iter()
            .map(|(fragment, cause, captures_killer)| DeathCause {
                fragment: (*fragment).to_string(),
                cause: (*cause).to_string(),
                captures_killer: *captures_killer,
            })
            .collect();
        Self::new(BUILTIN_TABLE_VERSION, causes)
    }

    pub fn from_file(path: &Path) -> Result<Self, DeathCauseError> {
        let contents = fs::read(path).map_err(|source| DeathCauseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table: DeathCauseTable =
            serde_json::from_slice(&contents).map_err(|source| DeathCauseError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if table.causes.is_empty() {
            return Err(DeathCauseError::Empty {
                path: path.to_path_buf(),
            });
        }
        for (index, entry) in table.causes.iter().enumerate() {
            let reason = if entry.fragment.trim().is_empty() {
                "fragment is empty"
            } else if entry.cause.trim().is_empty() {
                "cause is empty"
            } else {
                continue;
            };
            return Err(DeathCauseError::InvalidEntry {
                path: path.to_path_buf(),
                index,
                reason,
            });
        }
        Ok(Self::new(table.version, table.causes))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn causes(&self) -> &[DeathCause] {
        &self.causes
    }

    /// Matches the text following the player name against the table.
    pub fn match_phrase(&self, phrase: &str) -> Option<DeathMatch<'_>> {
        self.causes.iter().find_map(|entry| {
            let rest = phrase.strip_prefix(entry.fragment.as_str())?;
            if !(rest.is_empty() || rest.starts_with(' ')) {
                return None;
            }
            let killer = if entry.captures_killer {
                parse_killer(rest)
            } else {
                None
            };
            Some(DeathMatch {
                cause: entry.cause.as_str(),
                killer,
            })
        })
    }
}

impl Default for DeathCauseTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn parse_killer(rest: &str) -> Option<String> {
    let rest = rest.trim();
    let killer = rest.split(" using ").next().unwrap_or(rest).trim();
    if killer.is_empty() {
        None
    } else {
        Some(killer.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_table_is_sorted_longest_first() {
        let table = DeathCauseTable::builtin();
        assert_eq!(table.version(), BUILTIN_TABLE_VERSION);
        assert!(table
            .causes()
            .windows(2)
            .all(|pair| pair[0].fragment.len() >= pair[1].fragment.len()));
    }

    #[test]
    fn test_longer_fragment_wins() {
        let table = DeathCauseTable::builtin();
        let matched = table.match_phrase("was killed by magic").unwrap();
        assert_eq!(matched.cause, "magic");
        assert_eq!(matched.killer, None);

        let matched = table.match_phrase("was killed by Witch").unwrap();
        assert_eq!(matched.cause, "combat");
        assert_eq!(matched.killer.as_deref(), Some("Witch"));
    }

    #[test]
    fn test_killer_weapon_suffix_is_dropped() {
        let table = DeathCauseTable::builtin();
        let matched = table
            .match_phrase("was shot by Skeleton using [Bow]")
            .unwrap();
        assert_eq!(matched.killer.as_deref(), Some("Skeleton"));
    }

    #[test]
    fn test_fragment_must_end_at_word_boundary() {
        let table = DeathCauseTable::builtin();
        assert!(table.match_phrase("diedrich says hi").is_none());
        assert!(table.match_phrase("died").is_some());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("causes.json");
        fs::write(
            &path,
            r#"{"version": 7, "causes": [
                {"fragment": "was zapped", "cause": "lightning"},
                {"fragment": "was bonked by", "cause": "combat", "captures_killer": true}
            ]}"#,
        )
        .unwrap();

        let table = DeathCauseTable::from_file(&path).unwrap();

        assert_eq!(table.version(), 7);
        assert_eq!(table.causes().len(), 2);
        let matched = table.match_phrase("was bonked by Steve").unwrap();
        assert_eq!(matched.cause, "combat");
        assert_eq!(matched.killer.as_deref(), Some("Steve"));
        assert!(table.match_phrase("drowned").is_none());
    }

    #[test]
    fn test_empty_file_table_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("causes.json");
        fs::write(&path, r#"{"version": 1, "causes": []}"#).unwrap();

        assert!(matches!(
            DeathCauseTable::from_file(&path),
            Err(DeathCauseError::Empty { .. })
        ));
    }

    #[test]
    fn test_blank_entries_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("causes.json");

        fs::write(
            &path,
            r#"{"version": 2, "causes": [
                {"fragment": "drowned", "cause": "drowning"},
                {"fragment": "  ", "cause": "other"}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            DeathCauseTable::from_file(&path),
            Err(DeathCauseError::InvalidEntry { index: 1, reason: "fragment is empty", .. })
        ));

        fs::write(
            &path,
            r#"{"version": 2, "causes": [{"fragment": "drowned", "cause": ""}]}"#,
        )
        .unwrap();
        assert!(matches!(
            DeathCauseTable::from_file(&path),
            Err(DeathCauseError::InvalidEntry { index: 0, reason: "cause is empty", .. })
        ));
    }

    #[test]
    fn test_malformed_file_table_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("causes.json");
        fs::write(&path, "[").unwrap();

        assert!(matches!(
            DeathCauseTable::from_file(&path),
            Err(DeathCauseError::Parse { .. })
        ));
    }
}
