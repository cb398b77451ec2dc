// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collects gameplay events from a Minecraft server log and per-player stat snapshots, and
//! forwards both to a sink as row-oriented records.
//!
//! - [`reader`]: offset-tracked reading of the rotation-prone log file
//! - [`extractor`]: log lines to typed [`event::DomainEvent`]s
//! - [`snapshot`]: stat files to [`snapshot::EntitySnapshot`]s
//! - [`collector`]: the interval loop tying them to a [`sink::SinkWriter`]

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod collector;
pub mod config;
pub mod cursor;
pub mod death_causes;
pub mod errors;
pub mod event;
pub mod extractor;
pub mod http_utils;
pub mod identity;
pub mod reader;
pub mod record;
pub mod sink;
pub mod snapshot;
