//! Utility modules for orco-core
//!
//! - metrics: lightweight in-process counters/gauges/histograms, recorded
//!   at the scheduler-tick and tool-execution boundaries in [`crate::workflow`].

mod metrics;

pub use metrics::{
    global as metrics_global, Counter, Gauge, Histogram, LabeledCounter, LabeledHistogram,
    MetricsRegistry, Timer,
};
