mod expiry;
mod reconcile;

#[cfg(feature = "metrics")]
mod metrics;

pub use reconcile::run;
