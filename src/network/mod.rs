mod ingress;
mod reconcile;

#[cfg(feature = "metrics")]
mod metrics;

pub use reconcile::run;
