// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use elastic_logs::{Driver, DriverDefaults, FifoOpener, LogInfo};

/// Reads container log streams and ships JSON lines to Elasticsearch.
#[derive(Parser, Debug)]
#[command(name = "elastic-log-shipper", version)]
struct Args {
    /// Stream to consume: a named pipe or a captured stream file. Repeatable.
    #[arg(long = "stream", required = true)]
    streams: Vec<String>,

    /// Session option, as `key=value` (host, index, type, bulksize, datesuffix,
    /// USER, PASSWORD, timeout, flushonstop, maxinflight). Repeatable.
    #[arg(long = "opt", value_parser = parse_key_val)]
    opts: Vec<(String, String)>,

    /// Container id used as log context. Defaults to the stream path.
    #[arg(long)]
    container_id: Option<String>,

    /// Container name used as log context. Defaults to the stream path.
    #[arg(long)]
    container_name: Option<String>,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

#[tokio::main]
pub async fn main() {
    let args = Args::parse();

    let log_level = env::var("LOG_LEVEL")
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
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let driver = Driver::new(DriverDefaults::from_os_env(), Arc::new(FifoOpener));

    for stream in &args.streams {
        let mut info = LogInfo::new(
            args.container_id.as_deref().unwrap_or(stream),
            args.container_name.as_deref().unwrap_or(stream),
        );
        for (key, value) in &args.opts {
            info = info.with_option(key, value);
        }
        if let Err(e) = driver.start_logging(stream, info).await {
            error!(stream = %stream, "Unable to start logging: {}", e);
        }
    }

    if driver.session_ids().is_empty() {
        error!("No stream could be started. Shutting down.");
        return;
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt, stopping loggers"),
        Err(e) => error!("Unable to listen for shutdown signal: {}", e),
    }
    driver.shutdown().await;
}
