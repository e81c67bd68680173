//! A high-level StatsD metric client built on cadence.
//!
//! statspipe measures its own behavior (lines parsed, buckets flushed, sink
//! retries) with the very protocol it processes, reported to an external
//! StatsD endpoint.
//!
//! ## Defining Metrics
//!
//! In order to use metrics, one needs to first define one of the metric
//! traits on a custom enum. The following types of metrics are available:
//! `counter`, `timer`, `gauge`, and `histogram`. The metric traits serve
//! only to provide a type safe metric name.
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a statsd client. In that case,
//! invoking `with_client` or the [`metric!`] macro will become a noop. Only
//! when configured, metrics will actually be collected.
//!
//! ## Macro Usage
//!
//! The recommended way to record metrics is by using the [`metric!`] macro:
//!
//! ```
//! use statspipe_statsd::{metric, CounterMetric};
//!
//! struct MyCounter;
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         "counter"
//!     }
//! }
//!
//! metric!(counter(MyCounter) += 1);
//! ```

use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{BufferedUdpMetricSink, Metric, MetricBuilder, QueuingMetricSink, StatsdClient};
use parking_lot::RwLock;

/// Maximum number of metric events that can be queued before we start
/// dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// Client configuration object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Sends a metric, logging delivery errors instead of propagating them.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        if let Err(error) = metric.try_send() {
            statspipe_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>> =
        METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro.
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Sets a new statsd client.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Disables the client again.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
    CURRENT_CLIENT.with(|cell| cell.replace(None));
}

/// Tells the metrics system to report to statsd.
pub fn init<A: ToSocketAddrs>(prefix: &str, host: A) -> std::io::Result<()> {
    let addrs: Vec<_> = host.to_socket_addrs()?.collect();
    if let Some(addr) = addrs.first() {
        statspipe_log::info!("reporting metrics to statsd at {addr}");
    }

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let udp_sink = BufferedUdpMetricSink::from(&addrs[..], socket)
        .map_err(|error| std::io::Error::other(error.to_string()))?;
    let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);

    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(prefix, queuing_sink),
    });

    Ok(())
}

/// Invokes a callback with the current statsd client.
///
/// If no statsd client is configured, the callback is not invoked. For the
/// most part, the [`metric!`] macro should be used instead of invoking this
/// directly.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// Sets a capturing test client for the period of the called function.
///
/// Only affects the current thread and returns the raw metric strings
/// captured while `f` ran.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.iter()
        .filter_map(|bytes| String::from_utf8(bytes).ok())
        .collect()
}

/// A metric for capturing counters.
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end
/// point.
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing histograms.
pub trait HistogramMetric {
    /// Returns the histogram metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See the [crate level documentation](crate) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // histogram
    (histogram($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.histogram_with_tags(&$crate::HistogramMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value (duration)
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.time_with_tags(&$crate::TimerMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timed block
    (timer($id:expr), $($k:ident).* = $v:expr, $block:block) => {{
        let now = std::time::Instant::now();
        let rv = $block;
        $crate::metric!(timer($id) = now.elapsed(), $($k).* = $v);
        rv
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    enum TestCounters {
        Simple,
    }

    impl CounterMetric for TestCounters {
        fn name(&self) -> &'static str {
            match self {
                Self::Simple => "lines",
            }
        }
    }

    enum TestGauges {
        Queue,
    }

    impl GaugeMetric for TestGauges {
        fn name(&self) -> &'static str {
            match self {
                Self::Queue => "queue_size",
            }
        }
    }

    #[test]
    fn test_capturing_counter() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounters::Simple) += 10, kind = "counter");
        });

        assert_eq!(captures, ["lines:10|c|#kind:counter"]);
    }

    #[test]
    fn test_capturing_gauge() {
        let captures = with_capturing_test_client(|| {
            metric!(gauge(TestGauges::Queue) = 42);
        });

        assert_eq!(captures, ["queue_size:42|g"]);
    }

    #[test]
    fn test_zero_counter_not_sent() {
        let captures = with_capturing_test_client(|| {
            metric!(counter(TestCounters::Simple) += 0);
        });

        assert!(captures.is_empty());
    }
}
