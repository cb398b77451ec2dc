// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::NaiveDateTime;
use serde::Serialize;

/// A game event recognized in one log line. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainEvent {
    pub timestamp: NaiveDateTime,
    pub actor: String,
    pub kind: EventKind,
    /// The log message body the event was extracted from.
    pub raw_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Death {
        victim: String,
        killer: Option<String>,
        cause: String,
    },
    Advancement {
        title: String,
        flavor: AdvancementFlavor,
    },
    Join,
    Leave,
    Chat {
        message: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Death { .. } => "death",
            EventKind::Advancement { .. } => "advancement",
            EventKind::Join => "join",
            EventKind::Leave => "leave",
            EventKind::Chat { .. } => "chat",
        }
    }
}

/// Which of the three advancement announcements produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancementFlavor {
    Advancement,
    Challenge,
    Goal,
}

impl AdvancementFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvancementFlavor::Advancement => "advancement",
            AdvancementFlavor::Challenge => "challenge",
            AdvancementFlavor::Goal => "goal",
        }
    }
}
