// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns raw server log lines into [`DomainEvent`]s.
//!
//! Lines look like `[14:08:05] [Server thread/INFO]: Steve was slain by Zombie`. Only `INFO`
//! lines are considered, and each message is run through an ordered list of independent
//! matchers; the first one that recognizes the message wins. Anything unrecognized is dropped
//! without logging since most server output is informational noise.

use crate::death_causes::DeathCauseTable;
use crate::event::{AdvancementFlavor, DomainEvent, EventKind};
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static LOG_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{2}):(\d{2}):(\d{2})\] \[([^\]/]+)/(\w+)\]: (.+)$")
        .expect("log line pattern is valid")
});

#[allow(clippy::expect_used)]
static ADVANCEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([A-Za-z0-9_]+) has (made the advancement|completed the challenge|reached the goal) \[(.+)\]$",
    )
    .expect("advancement pattern is valid")
});

#[allow(clippy::expect_used)]
static JOIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_]+) joined the game$").expect("join pattern is valid")
});

#[allow(clippy::expect_used)]
static LEAVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_]+) left the game$").expect("leave pattern is valid")
});

#[allow(clippy::expect_used)]
static CHAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<([A-Za-z0-9_]+)> (.+)$").expect("chat pattern is valid")
});

type Matcher = fn(&EventExtractor, &str) -> Option<(String, EventKind)>;

const MATCHERS: &[Matcher] = &[
    EventExtractor::match_advancement,
    EventExtractor::match_join,
    EventExtractor::match_leave,
    EventExtractor::match_chat,
    EventExtractor::match_death,
];

/// Stateless extractor; the only configuration is the death-cause table.
#[derive(Debug, Clone, Default)]
pub struct EventExtractor {
    death_causes: DeathCauseTable,
}

impl EventExtractor {
    pub fn new(death_causes: DeathCauseTable) -> Self {
        EventExtractor { death_causes }
    }

    /// Extracts the event carried by `line`, if any.
    ///
    /// The log only records a time of day, so `log_date` supplies the calendar date.
    pub fn extract(&self, line: &str, log_date: NaiveDate) -> Option<DomainEvent> {
        let (time, message) = parse_info_line(line)?;
        self.extract_message(message, NaiveDateTime::new(log_date, time))
    }

    /// Runs the matchers over a message body already stripped of the log line prefix.
    pub fn extract_message(&self, message: &str, timestamp: NaiveDateTime) -> Option<DomainEvent> {
        let (actor, kind) = MATCHERS
            .iter()
            .find_map(|matcher| matcher(self, message))?;

        Some(DomainEvent {
            timestamp,
            actor,
            kind,
            raw_message: message.to_string(),
        })
    }

    /// Extracts every event in a run of consecutive log lines.
    ///
    /// `last_line_date` is the calendar date of the final timestamped line. Whenever the time
    /// of day goes backwards between two timestamped lines the log crossed midnight, so
    /// earlier lines are dated one day before later ones. A server that stayed silent for a
    /// whole day still collapses onto adjacent dates.
    pub fn extract_all<I>(&self, lines: I, last_line_date: NaiveDate) -> Vec<DomainEvent>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let lines: Vec<I::Item> = lines.into_iter().collect();
        let times: Vec<Option<NaiveTime>> = lines
            .iter()
            .map(|line| line_time(line.as_ref()))
            .collect();

        let rollovers = count_rollovers(times.iter().flatten().copied());
        let mut date = last_line_date
            .checked_sub_days(Days::new(rollovers))
            .unwrap_or(last_line_date);

        let mut previous: Option<NaiveTime> = None;
        let mut events = Vec::new();
        for (line, time) in lines.iter().zip(times) {
            if let Some(time) = time {
                if previous.is_some_and(|previous| time < previous) {
                    date = date.succ_opt().unwrap_or(date);
                }
                previous = Some(time);
            }
            if let Some(event) = self.extract(line.as_ref(), date) {
                events.push(event);
            }
        }
        events
    }

    fn match_advancement(&self, message: &str) -> Option<(String, EventKind)> {
        let caps = ADVANCEMENT_RE.captures(message)?;
        let flavor = match &caps[2] {
            "completed the challenge" => AdvancementFlavor::Challenge,
            "reached the goal" => AdvancementFlavor::Goal,
            _ => AdvancementFlavor::Advancement,
        };
        Some((
            caps[1].to_string(),
            EventKind::Advancement {
                title: caps[3].to_string(),
                flavor,
            },
        ))
    }

    fn match_join(&self, message: &str) -> Option<(String, EventKind)> {
        let caps = JOIN_RE.captures(message)?;
        Some((caps[1].to_string(), EventKind::Join))
    }

    fn match_leave(&self, message: &str) -> Option<(String, EventKind)> {
        let caps = LEAVE_RE.captures(message)?;
        Some((caps[1].to_string(), EventKind::Leave))
    }

    fn match_chat(&self, message: &str) -> Option<(String, EventKind)> {
        let caps = CHAT_RE.captures(message)?;
        Some((
            caps[1].to_string(),
            EventKind::Chat {
                message: caps[2].to_string(),
            },
        ))
    }

    fn match_death(&self, message: &str) -> Option<(String, EventKind)> {
        let (actor, phrase) = message.split_once(' ')?;
        if !is_player_name(actor) {
            return None;
        }
        let matched = self.death_causes.match_phrase(phrase)?;
        Some((
            actor.to_string(),
            EventKind::Death {
                victim: actor.to_string(),
                killer: matched.killer,
                cause: matched.cause.to_string(),
            },
        ))
    }
}

/// Time of day, level and message of a log line.
fn parse_line(line: &str) -> Option<(NaiveTime, &str, &str)> {
    let caps = LOG_LINE_RE.captures(line.trim_end_matches(['\r', '\n']))?;
    let time = NaiveTime::from_hms_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )?;
    Some((time, caps.get(5)?.as_str(), caps.get(6)?.as_str()))
}

fn parse_info_line(line: &str) -> Option<(NaiveTime, &str)> {
    match parse_line(line)? {
        (time, "INFO", message) => Some((time, message)),
        _ => None,
    }
}

/// Time of day of any timestamped line, whatever its level.
fn line_time(line: &str) -> Option<NaiveTime> {
    parse_line(line).map(|(time, _, _)| time)
}

fn count_rollovers(times: impl Iterator<Item = NaiveTime>) -> u64 {
    let mut previous: Option<NaiveTime> = None;
    let mut rollovers = 0;
    for time in times {
        if previous.is_some_and(|previous| time < previous) {
            rollovers += 1;
        }
        previous = Some(time);
    }
    rollovers
}

fn is_player_name(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
