use crate::metrics::METRICS_PREFIX;
use const_format::concatcp;
use lazy_static::lazy_static;
use prometheus::{register_counter, Counter};

const NETWORK_METRICS_PREFIX: &str = concatcp!(METRICS_PREFIX, "network_");

lazy_static! {
    pub static ref NETWORK_RECONCILE_COUNTER: Counter = register_counter!(
        concatcp!(NETWORK_METRICS_PREFIX, "reconcile_counter"),
        "Number of reconciliations by the network controller."
    )
    .unwrap();
    pub static ref INGRESS_UPDATE_COUNTER: Counter = register_counter!(
        concatcp!(NETWORK_METRICS_PREFIX, "ingress_update_counter"),
        "Number of writes to the singleton ingress."
    )
    .unwrap();
}
