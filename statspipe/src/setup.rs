use std::sync::Arc;

use statspipe_config::{Config, SinkConfig};
use statspipe_server::sinks::{ConsoleSink, ForwardSink};
use statspipe_server::Sink;

/// Instantiates the configured sinks.
///
/// Must run on the runtime, since every sink spawns its worker task.
pub fn create_sinks(config: &Config) -> Vec<Arc<dyn Sink>> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::with_capacity(config.sinks.len());

    for sink_config in &config.sinks {
        let sink: Arc<dyn Sink> = match sink_config {
            SinkConfig::Console => Arc::new(ConsoleSink::new()),
            SinkConfig::Forward(forward) => {
                statspipe_log::info!(
                    host = forward.host,
                    port = forward.port,
                    compression = forward.enable_compression,
                    "forwarding to peer"
                );
                Arc::new(ForwardSink::new(forward.clone()))
            }
        };

        statspipe_log::info!(sink = sink.name(), "sink registered");
        sinks.push(sink);
    }

    sinks
}

/// Logs the aggregators the pipeline will run with.
pub fn log_aggregators(config: &Config) {
    let aggregators = &config.aggregators;

    if let Some(counters) = &aggregators.counters {
        statspipe_log::info!(namespace = counters.namespace, "counter aggregation enabled");
    }
    if let Some(gauges) = &aggregators.gauges {
        statspipe_log::info!(
            namespace = gauges.namespace,
            remove_zero_gauges = gauges.remove_zero_gauges,
            "gauge aggregation enabled"
        );
    }
    if let Some(timers) = &aggregators.timers {
        let percentiles: Vec<u8> = timers.percentiles.iter().map(|p| p.percentile).collect();
        statspipe_log::info!(
            namespace = timers.namespace,
            reservoir_capacity = timers.reservoir_capacity,
            percentiles = ?percentiles,
            "timer aggregation enabled"
        );
    }
}
