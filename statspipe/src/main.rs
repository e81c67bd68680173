//! The statspipe daemon.
//!
//! Reads metric lines from standard input, runs them through the aggregation
//! pipeline, and delivers flushed buckets to the configured sinks until a
//! SIGINT or SIGTERM arrives. Network listeners attach through the same
//! parser address the stdin feeder uses.

mod cli;
mod setup;

use anyhow::Context;
use clap::Parser;
use statspipe_config::Config;
use statspipe_metrics::{ParserAddr, ProcessLine};
use statspipe_server::Pipeline;
use statspipe_system::Controller;
use tokio::io::{AsyncBufReadExt, BufReader};

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let config = cli.load_config()?;

    statspipe_log::init(&config.logging);
    if config.metrics.enabled {
        statspipe_statsd::init(&config.metrics.prefix, &config.metrics.host)
            .context("failed to initialize statsd reporting")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    Controller::start(config.shutdown_timeout());

    setup::log_aggregators(&config);
    let sinks = setup::create_sinks(&config);
    let pipeline = Pipeline::start(&config, sinks);

    let feeder = tokio::spawn(feed_stdin(pipeline.parser()));

    let shutdown = Controller::shutdown_handle().notified().await;

    // The feeder holds a parser address; it must go before the cascade can
    // start.
    feeder.abort();
    let _ = feeder.await;

    match shutdown.timeout {
        Some(timeout) => {
            if tokio::time::timeout(timeout, pipeline.shutdown())
                .await
                .is_err()
            {
                statspipe_log::error!("graceful shutdown timed out");
            }
        }
        None => drop(pipeline),
    }

    Ok(())
}

/// Feeds metric lines from standard input into the pipeline.
///
/// A closed stdin does not stop the process; shutdown stays signal-driven.
async fn feed_stdin(parser: ParserAddr) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if !line.is_empty() {
            parser.send(ProcessLine(line));
        }
    }

    statspipe_log::debug!("stdin closed");
    drop(parser);
    std::future::pending::<()>().await;
}
