// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use mc_collector::{
    collector::Collector,
    config::{self, SinkConfig},
    cursor::FileCursorStore,
    sink,
};

#[tokio::main]
pub async fn main() {
    // Config errors are reported before the configured level is known
    let log_level = env::var("MC_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config::Config::new() {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading config: {e}");
            process::exit(1);
        }
    };

    match &config.sink {
        SinkConfig::Http { url, .. } => info!("Sending records to {url}"),
        SinkConfig::File { path } => info!("Appending records to {}", path.display()),
    }
    let sink = match sink::build_sink(&config.sink) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Unable to create sink: {e}");
            process::exit(1);
        }
    };

    let cursor_store = Arc::new(FileCursorStore::new(&config.log_offset_file));
    let mut collector = match Collector::from_config(&config, cursor_store, sink) {
        Ok(collector) => collector,
        Err(e) => {
            error!("Unable to start collector: {e}");
            process::exit(1);
        }
    };

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    info!(
        "Collecting {} and {} every {}s",
        config.log_file.display(),
        config.stats_dir.display(),
        config.collect_interval_secs
    );
    if let Err(e) = collector.run(cancel_token).await {
        error!("Collector stopped: {e}");
        process::exit(1);
    }
    info!("Collector shut down");
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown requested");
    cancel_token.cancel();
}
