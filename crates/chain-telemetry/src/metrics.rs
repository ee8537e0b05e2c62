//! Typed wrappers over the `metrics` crate's counters/gauges/histograms, and
//! the [`Metrics`] trait every subsystem metrics struct implements.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` was already registered")]
    AlreadyRegistered { name: &'static str },
}

/// A monotonically increasing counter.
#[derive(Clone)]
pub struct Counter(metrics::Counter);

impl Counter {
    pub fn increment(&self, value: u64) {
        self.0.increment(value);
    }
}

/// An instantaneous value that can go up or down.
#[derive(Clone)]
pub struct Gauge(metrics::Gauge);

impl Gauge {
    pub fn set(&self, value: impl Into<f64>) {
        self.0.set(value.into());
    }

    pub fn increment(&self, value: impl Into<f64>) {
        self.0.increment(value.into());
    }

    pub fn decrement(&self, value: impl Into<f64>) {
        self.0.decrement(value.into());
    }
}

/// A distribution of observed values.
#[derive(Clone)]
pub struct Histogram(metrics::Histogram);

impl Histogram {
    pub fn record(&self, value: impl Into<f64>) {
        self.0.record(value.into());
    }
}

pub struct CounterFactory {
    name: &'static str,
}

impl CounterFactory {
    /// # Errors
    /// Never fails; returns `Result` for symmetry with other factories and
    /// to leave room for future validation.
    pub fn register(self) -> Result<Counter, Error> {
        Ok(Counter(metrics::counter!(self.name)))
    }
}

pub struct GaugeFactory {
    name: &'static str,
}

impl GaugeFactory {
    /// # Errors
    /// Never fails; see [`CounterFactory::register`].
    pub fn register(self) -> Result<Gauge, Error> {
        Ok(Gauge(metrics::gauge!(self.name)))
    }
}

pub struct HistogramFactory {
    name: &'static str,
}

impl HistogramFactory {
    /// # Errors
    /// Never fails; see [`CounterFactory::register`].
    pub fn register(self) -> Result<Histogram, Error> {
        Ok(Histogram(metrics::histogram!(self.name)))
    }
}

/// Accumulates metric descriptions during a [`Metrics::register`] call.
#[derive(Default)]
pub struct RegisteringBuilder {
    _private: (),
}

impl RegisteringBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns an error if `name` was already described under a different
    /// help string (the underlying registry is append-only).
    pub fn new_counter_factory(
        &mut self,
        name: &'static str,
        help: &'static str,
    ) -> Result<CounterFactory, Error> {
        metrics::describe_counter!(name, help);
        Ok(CounterFactory {
            name,
        })
    }

    /// # Errors
    /// See [`Self::new_counter_factory`].
    pub fn new_gauge_factory(
        &mut self,
        name: &'static str,
        help: &'static str,
    ) -> Result<GaugeFactory, Error> {
        metrics::describe_gauge!(name, help);
        Ok(GaugeFactory {
            name,
        })
    }

    /// # Errors
    /// See [`Self::new_counter_factory`].
    pub fn new_histogram_factory(
        &mut self,
        name: &'static str,
        help: &'static str,
    ) -> Result<HistogramFactory, Error> {
        metrics::describe_histogram!(name, help);
        Ok(HistogramFactory {
            name,
        })
    }
}

/// Implemented once per subsystem (`ChainMetrics`, `ResourceLimitsMetrics`,
/// ...) to declare what it measures and how to construct it, both for real
/// use and for tests that don't want a live recorder.
pub trait Metrics: Send + Sync + Sized + 'static {
    type Config;

    /// # Errors
    /// Returns an error if a metric name collides during registration.
    fn register(builder: &mut RegisteringBuilder, config: &Self::Config) -> Result<Self, Error>;

    /// Builds `Self` without requiring a global recorder to be installed;
    /// every produced `Counter`/`Gauge`/`Histogram` silently discards writes.
    ///
    /// # Errors
    /// See [`Self::register`].
    fn noop_metrics(config: &Self::Config) -> Result<Self, Error> {
        // Best-effort: if a recorder (noop or real) is already installed for
        // this process, that's fine, we only need *some* recorder present so
        // that `metrics::counter!`/`gauge!`/`histogram!` don't panic.
        let _ = metrics::set_global_recorder(NoopRecorder);
        let mut builder = RegisteringBuilder::new();
        Self::register(&mut builder, config)
    }
}

/// A [`metrics::Recorder`] that discards every registration and update; used
/// by [`Metrics::noop_metrics`] so unit tests don't need a live exporter.
struct NoopRecorder;

impl metrics::Recorder for NoopRecorder {
    fn describe_counter(
        &self,
        _key: metrics::KeyName,
        _unit: Option<metrics::Unit>,
        _description: metrics::SharedString,
    ) {
    }

    fn describe_gauge(
        &self,
        _key: metrics::KeyName,
        _unit: Option<metrics::Unit>,
        _description: metrics::SharedString,
    ) {
    }

    fn describe_histogram(
        &self,
        _key: metrics::KeyName,
        _unit: Option<metrics::Unit>,
        _description: metrics::SharedString,
    ) {
    }

    fn register_counter(
        &self,
        _key: &metrics::Key,
        _metadata: &metrics::Metadata<'_>,
    ) -> metrics::Counter {
        metrics::Counter::noop()
    }

    fn register_gauge(
        &self,
        _key: &metrics::Key,
        _metadata: &metrics::Metadata<'_>,
    ) -> metrics::Gauge {
        metrics::Gauge::noop()
    }

    fn register_histogram(
        &self,
        _key: &metrics::Key,
        _metadata: &metrics::Metadata<'_>,
    ) -> metrics::Histogram {
        metrics::Histogram::noop()
    }
}
