use crate::metrics::METRICS_PREFIX;
use const_format::concatcp;
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

const GC_METRICS_PREFIX: &str = concatcp!(METRICS_PREFIX, "gc_");

lazy_static! {
    pub static ref GC_RECONCILE_COUNTER: CounterVec = register_counter_vec!(
        concatcp!(GC_METRICS_PREFIX, "reconcile_counter"),
        "Number of reconciliations by the GC controller.",
        &["registration"]
    )
    .unwrap();
    pub static ref PODS_RECLAIMED_COUNTER: CounterVec = register_counter_vec!(
        concatcp!(GC_METRICS_PREFIX, "pods_reclaimed_counter"),
        "Number of idle pods reclaimed after their grace period.",
        &["pod"]
    )
    .unwrap();
}
