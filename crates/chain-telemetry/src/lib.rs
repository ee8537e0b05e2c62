//! Tracing and metrics bootstrap shared by every binary in this workspace.
//!
//! Mirrors the "configure, then `try_init`" builder shape used across the
//! node's services: a filter-directive string controls `tracing`, and an
//! optional HTTP listener exposes a Prometheus metrics endpoint.

use std::net::SocketAddr;

use tracing_subscriber::{
    layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
    EnvFilter,
};

pub mod metrics;

pub use metrics::Metrics;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse filter directives `{directives}`")]
    InvalidFilterDirectives {
        directives: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install the global tracing subscriber")]
    SetGlobalSubscriber(#[source] tracing::subscriber::SetGlobalDefaultError),
    #[error("failed to install the prometheus metrics recorder")]
    InstallRecorder(#[source] metrics_exporter_prometheus::BuildError),
    #[error("failed to register a metric")]
    RegisterMetric(#[from] metrics::Error),
}

/// Guard returned by [`TelemetryBuilder::try_init`]; dropping it is a no-op,
/// it exists purely to keep the metrics exporter task alive for the
/// lifetime of the process.
#[must_use = "dropping the telemetry guard may stop metrics export"]
pub struct TelemetryGuard {
    _prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

pub struct TelemetryBuilder {
    filter_directives: String,
    force_stdout: bool,
    no_otel: bool,
    metrics_addr: Option<SocketAddr>,
    service_name: &'static str,
}

/// Returns a new, unconfigured [`TelemetryBuilder`].
#[must_use]
pub fn configure() -> TelemetryBuilder {
    TelemetryBuilder {
        filter_directives: "info".to_string(),
        force_stdout: false,
        no_otel: true,
        metrics_addr: None,
        service_name: "chain-node",
    }
}

impl TelemetryBuilder {
    #[must_use]
    pub fn set_filter_directives(mut self, directives: &str) -> Self {
        self.filter_directives = directives.to_string();
        self
    }

    #[must_use]
    pub fn set_force_stdout(mut self, force_stdout: bool) -> Self {
        self.force_stdout = force_stdout;
        self
    }

    #[must_use]
    pub fn set_no_otel(mut self, no_otel: bool) -> Self {
        self.no_otel = no_otel;
        self
    }

    #[must_use]
    pub fn set_metrics(mut self, addr: &SocketAddr, service_name: &'static str) -> Self {
        self.metrics_addr = Some(*addr);
        self.service_name = service_name;
        self
    }

    /// Installs the tracing subscriber and, if a metrics address was set,
    /// the prometheus recorder; then registers and returns `M`.
    ///
    /// # Errors
    /// Returns an error if the filter directives don't parse, a global
    /// subscriber or recorder is already installed, or metric registration
    /// fails.
    pub fn try_init<M: Metrics>(
        self,
        config: &M::Config,
    ) -> Result<(&'static M, TelemetryGuard), Error> {
        let env_filter =
            EnvFilter::try_new(&self.filter_directives).map_err(|source| {
                Error::InvalidFilterDirectives {
                    directives: self.filter_directives.clone(),
                    source,
                }
            })?;

        let fmt_layer = if self.force_stdout {
            tracing_subscriber::fmt::layer().with_writer(std::io::stdout).boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(Error::SetGlobalSubscriber)?;

        let prometheus = match self.metrics_addr {
            Some(addr) => {
                let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
                    .with_http_listener(addr)
                    .install_recorder()
                    .map_err(Error::InstallRecorder)?;
                Some(handle)
            }
            None => None,
        };

        let mut builder = metrics::RegisteringBuilder::new();
        let registered = M::register(&mut builder, config)?;
        let leaked: &'static M = Box::leak(Box::new(registered));

        Ok((
            leaked,
            TelemetryGuard {
                _prometheus: prometheus,
            },
        ))
    }
}

/// Declares `pub const` metric name strings, each namespaced under the
/// crate's package name so two services never collide on a metric name.
#[macro_export]
macro_rules! metric_names {
    ($(pub const $name:ident = $value:literal;)+) => {
        $(
            pub const $name: &str = concat!(env!("CARGO_PKG_NAME"), "_", $value);
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopConfig;

    struct TestMetrics {
        requests: metrics::Counter,
    }

    impl Metrics for TestMetrics {
        type Config = NoopConfig;

        fn register(
            builder: &mut metrics::RegisteringBuilder,
            _config: &Self::Config,
        ) -> Result<Self, metrics::Error> {
            let requests = builder
                .new_counter_factory("requests_total", "total requests handled")?
                .register()?;
            Ok(Self {
                requests,
            })
        }
    }

    #[test]
    fn noop_metrics_can_be_constructed_without_a_global_recorder() {
        let metrics = TestMetrics::noop_metrics(&NoopConfig).unwrap();
        metrics.requests.increment(1);
    }
}
