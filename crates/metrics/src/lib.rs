//! Process-global Prometheus registry plus the registration macros the rest
//! of the workspace uses. Metric statics live next to the code that logs
//! them, in per-crate `metrics` modules.

use std::sync::LazyLock;

pub use paste::paste;
pub use prometheus;
use prometheus::{
    Histogram,
    IntCounter,
    Registry,
};

pub static LATTICE_METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Register an integer counter with the Lattice metrics registry and store
/// it in a static variable. The reported metric name is the
/// lower_snake_case version of the declared variable name.
#[macro_export]
macro_rules! register_lattice_counter {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                let counter = $crate::prometheus::IntCounter::new(name, $HELP)
                    .expect("Metric initialization failed");
                // Re-registration only happens when a static is redeclared,
                // which is a programmer error we want loudly.
                $crate::LATTICE_METRICS_REGISTRY
                    .register(Box::new(counter.clone()))
                    .expect("Metric registration failed");
                counter
            });
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounterVec> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                let opts = $crate::prometheus::Opts::new(name, $HELP);
                let counter = $crate::prometheus::IntCounterVec::new(opts, $LABELS)
                    .expect("Metric initialization failed");
                $crate::LATTICE_METRICS_REGISTRY
                    .register(Box::new(counter.clone()))
                    .expect("Metric registration failed");
                counter
            });
    };
}

/// Register a histogram with the Lattice metrics registry and store it in a
/// static variable. The reported metric name is the lower_snake_case
/// version of the declared variable name.
#[macro_export]
macro_rules! register_lattice_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Histogram> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                let opts = $crate::prometheus::HistogramOpts::new(name, $HELP);
                let histogram = $crate::prometheus::Histogram::with_opts(opts)
                    .expect("Metric initialization failed");
                $crate::LATTICE_METRICS_REGISTRY
                    .register(Box::new(histogram.clone()))
                    .expect("Metric registration failed");
                histogram
            });
    };
}

pub fn log_counter(counter: &IntCounter, value: u64) {
    counter.inc_by(value);
}

pub fn log_distribution(histogram: &Histogram, value: f64) {
    histogram.observe(value);
}

/// RAII guard that observes the elapsed wall-clock seconds into a histogram
/// when dropped.
pub struct Timer<'a> {
    histogram: &'a Histogram,
    start: std::time::Instant,
}

impl<'a> Timer<'a> {
    pub fn new(histogram: &'a Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
