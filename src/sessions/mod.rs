mod allocator;
mod client_pods;
mod reconcile;
mod registrations;
mod session_pods;

#[cfg(feature = "metrics")]
mod metrics;

pub use reconcile::run;
