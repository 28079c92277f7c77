pub mod latency;
pub mod pipeline_metrics;

pub use latency::*;
pub use pipeline_metrics::*;
