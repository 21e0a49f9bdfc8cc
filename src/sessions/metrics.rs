use crate::metrics::METRICS_PREFIX;
use const_format::concatcp;
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

const SESSION_METRICS_PREFIX: &str = concatcp!(METRICS_PREFIX, "sessions_");

lazy_static! {
    pub static ref SESSION_RECONCILE_COUNTER: CounterVec = register_counter_vec!(
        concatcp!(SESSION_METRICS_PREFIX, "reconcile_counter"),
        "Number of reconciliations by the Session controller.",
        &["name", "namespace"]
    )
    .unwrap();
}
