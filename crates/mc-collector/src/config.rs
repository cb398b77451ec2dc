// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::death_causes::DeathCauseTable;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SERVER_DIR: &str = "/opt/minecraft";
const DEFAULT_LOG_OFFSET_FILE: &str = ".log_offset";
const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 120;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
const DEFAULT_SINK_TIMEOUT_SECS: u64 = 30;

/// Where batches are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    Http {
        url: String,
        api_key: Option<String>,
        timeout: Duration,
        compression_level: Option<i32>,
        https_proxy: Option<String>,
    },
    File {
        path: PathBuf,
    },
}

#[derive(Debug)]
pub struct Config {
    /// The tailed server log.
    pub log_file: PathBuf,
    /// Directory of per-player stat snapshots.
    pub stats_dir: PathBuf,
    pub usercache_file: PathBuf,
    pub log_offset_file: PathBuf,
    /// how often to run a collection cycle, in seconds
    pub collect_interval_secs: u64,
    /// first sink retry delay, in milliseconds
    pub backoff_base_ms: u64,
    /// cap on the sink retry delay, in seconds
    pub backoff_max_secs: u64,
    pub death_causes: DeathCauseTable,
    pub sink: SinkConfig,
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let server_dir = PathBuf::from(
            env::var("MC_SERVER_DIR").unwrap_or_else(|_| DEFAULT_SERVER_DIR.to_string()),
        );
        let log_file = path_var("MC_LOG_FILE").unwrap_or_else(|| server_dir.join("logs/latest.log"));
        let stats_dir = path_var("MC_STATS_DIR").unwrap_or_else(|| server_dir.join("world/stats"));
        let usercache_file =
            path_var("MC_USERCACHE_FILE").unwrap_or_else(|| server_dir.join("usercache.json"));
        let log_offset_file =
            path_var("MC_LOG_OFFSET_FILE").unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_OFFSET_FILE));

        // The log file itself may not exist yet, but its directory must
        let log_dir = log_file.parent().unwrap_or_else(|| Path::new("."));
        let log_dir = if log_dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            log_dir
        };
        if !log_dir.is_dir() {
            return Err(anyhow::anyhow!(
                "Log directory {} does not exist. Shutting down collector.",
                log_dir.display()
            )
            .into());
        }

        let collect_interval_secs =
            positive_var("MC_COLLECT_INTERVAL_SECONDS", DEFAULT_COLLECT_INTERVAL_SECS)?;
        let backoff_base_ms = positive_var("MC_BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS)?;
        let backoff_max_secs = positive_var("MC_BACKOFF_MAX_SECONDS", DEFAULT_BACKOFF_MAX_SECS)?;

        let death_causes = match path_var("MC_DEATH_CAUSES_FILE") {
            Some(path) => DeathCauseTable::from_file(&path).map_err(|err| {
                anyhow::anyhow!("Unusable death cause table, collector will not start. Error: {err}")
            })?,
            None => DeathCauseTable::builtin(),
        };

        let sink = sink_config()?;

        Ok(Config {
            log_file,
            stats_dir,
            usercache_file,
            log_offset_file,
            collect_interval_secs,
            backoff_base_ms,
            backoff_max_secs,
            death_causes,
            sink,
        })
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

fn path_var(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Reads a positive integer, falling back to `default` when unset. Any other value is fatal.
fn positive_var(name: &str, default: u64) -> Result<u64, anyhow::Error> {
    match env::var(name) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(number) if number > 0 => Ok(number),
            _ => Err(anyhow::anyhow!(
                "{name} must be a positive integer, got {value:?}"
            )),
        },
        Err(_) => Ok(default),
    }
}

fn sink_config() -> Result<SinkConfig, anyhow::Error> {
    if let Some(url) = env::var("MC_SINK_URL").ok().filter(|url| !url.trim().is_empty()) {
        let url = url.trim().to_string();
        match reqwest::Url::parse(&url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => {
                return Err(anyhow::anyhow!(
                    "MC_SINK_URL must use http or https, got scheme {:?}",
                    parsed.scheme()
                ))
            }
            Err(e) => return Err(anyhow::anyhow!("MC_SINK_URL {url:?} is not a valid URL: {e}")),
        }
        let timeout_secs = positive_var("MC_SINK_TIMEOUT_SECONDS", DEFAULT_SINK_TIMEOUT_SECS)?;
        let compression_level = match env::var("MC_SINK_COMPRESSION_LEVEL") {
            Ok(level) => Some(level.trim().parse::<i32>().map_err(|_| {
                anyhow::anyhow!("MC_SINK_COMPRESSION_LEVEL must be an integer, got {level:?}")
            })?),
            Err(_) => None,
        };
        return Ok(SinkConfig::Http {
            url,
            api_key: env::var("MC_SINK_API_KEY").ok(),
            timeout: Duration::from_secs(timeout_secs),
            compression_level,
            https_proxy: env::var("MC_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok(),
        });
    }

    if let Some(path) = path_var("MC_SINK_FILE") {
        return Ok(SinkConfig::File { path });
    }

    Err(anyhow::anyhow!(
        "No sink configured. Set MC_SINK_URL or MC_SINK_FILE."
    ))
}
