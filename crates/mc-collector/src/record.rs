// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Row-oriented records handed to sinks.
//!
//! A [`Batch`] holds one cycle's events and snapshots. Sinks receive it flattened into
//! [`SinkRecord`]s: one row per event, one row per snapshot counter and one row per category
//! total. Each row carries an `insert_id` derived from its natural key so a sink can
//! deduplicate rows delivered more than once.

use crate::event::{DomainEvent, EventKind};
use crate::snapshot::EntitySnapshot;
use chrono::{DateTime, NaiveDateTime, Utc};
use fnv::FnvHasher;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hasher;

/// Everything collected in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub events: Vec<DomainEvent>,
    pub snapshots: Vec<EntitySnapshot>,
}

impl Batch {
    pub fn new(events: Vec<DomainEvent>, snapshots: Vec<EntitySnapshot>) -> Self {
        Batch { events, snapshots }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.snapshots.is_empty()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        let mut records = Vec::with_capacity(self.events.len());

        // Identical lines within a batch still get distinct ids
        let mut occurrences: HashMap<(NaiveDateTime, &str), u32> = HashMap::new();
        for event in &self.events {
            let seen = occurrences
                .entry((event.timestamp, event.raw_message.as_str()))
                .or_insert(0);
            records.push(SinkRecord::Event(EventRecord::from_event(event, *seen)));
            *seen += 1;
        }

        for snapshot in &self.snapshots {
            for (category, subkeys) in &snapshot.counters {
                for (subkey, value) in subkeys {
                    records.push(SinkRecord::Counter(CounterRecord {
                        insert_id: insert_id(&[
                            "counter",
                            &snapshot.captured_at.to_rfc3339(),
                            &snapshot.entity_id,
                            category,
                            subkey,
                        ]),
                        captured_at: snapshot.captured_at,
                        entity: snapshot.display_name.clone(),
                        entity_id: snapshot.entity_id.clone(),
                        category: category.clone(),
                        subkey: subkey.clone(),
                        value: *value,
                    }));
                }
            }
            for (category, total) in &snapshot.totals {
                records.push(SinkRecord::CategoryTotal(CategoryTotalRecord {
                    insert_id: insert_id(&[
                        "category_total",
                        &snapshot.captured_at.to_rfc3339(),
                        &snapshot.entity_id,
                        category,
                    ]),
                    captured_at: snapshot.captured_at,
                    entity: snapshot.display_name.clone(),
                    entity_id: snapshot.entity_id.clone(),
                    category: category.clone(),
                    total: *total,
                }));
            }
        }
        records
    }

    /// Newline-delimited JSON, one record per line.
    pub fn to_ndjson(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut body = Vec::new();
        for record in self.records() {
            serde_json::to_writer(&mut body, &record)?;
            body.push(b'\n');
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum SinkRecord {
    Event(EventRecord),
    Counter(CounterRecord),
    CategoryTotal(CategoryTotalRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub insert_id: String,
    pub timestamp: NaiveDateTime,
    pub kind: String,
    pub actor: String,
    /// Advancement title or chat message.
    pub details: Option<String>,
    pub flavor: Option<String>,
    pub killer: Option<String>,
    pub cause: Option<String>,
    pub raw_message: String,
}

impl EventRecord {
    fn from_event(event: &DomainEvent, occurrence: u32) -> Self {
        let (details, flavor, killer, cause) = match &event.kind {
            EventKind::Death { killer, cause, .. } => {
                (None, None, killer.clone(), Some(cause.clone()))
            }
            EventKind::Advancement { title, flavor } => (
                Some(title.clone()),
                Some(flavor.as_str().to_string()),
                None,
                None,
            ),
            EventKind::Chat { message } => (Some(message.clone()), None, None, None),
            EventKind::Join | EventKind::Leave => (None, None, None, None),
        };
        EventRecord {
            insert_id: insert_id(&[
                "event",
                &event.timestamp.to_string(),
                &event.raw_message,
                &occurrence.to_string(),
            ]),
            timestamp: event.timestamp,
            kind: event.kind.name().to_string(),
            actor: event.actor.clone(),
            details,
            flavor,
            killer,
            cause,
            raw_message: event.raw_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterRecord {
    pub insert_id: String,
    pub captured_at: DateTime<Utc>,
    pub entity: String,
    pub entity_id: String,
    pub category: String,
    pub subkey: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTotalRecord {
    pub insert_id: String,
    pub captured_at: DateTime<Utc>,
    pub entity: String,
    pub entity_id: String,
    pub category: String,
    pub total: i64,
}

fn insert_id(parts: &[&str]) -> String {
    let mut hasher = FnvHasher::default();
    for part in parts {
        hasher.write(part.as_bytes());
        // Separator keeps ("ab", "c") and ("a", "bc") apart
        hasher.write_u8(0xff);
    }
    format!("{:016x}", hasher.finish())
}
