use std::time::Duration;

pub mod conditions;
pub mod index;
pub mod pods;
pub mod status;

mod error;

pub use error::*;

/// Requeue interval of the GC controller.
pub(crate) const GC_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue delay after a failed reconciliation.
pub(crate) const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Namespace that holds the workload pods, their services and the ingress.
pub(crate) const WORKLOAD_NAMESPACE: &str = "default";

/// Namespace that holds the GC registrations.
pub(crate) const GC_NAMESPACE: &str = "telepresence-gc";

/// Annotation on the Session carrying the hash of the last written status.
pub(crate) const STATUS_HASH_ANNOTATION: &str = "statusHash";

/// Label selector matching everything managed by these controllers.
pub(crate) const TELEPRESENCE_SELECTOR: &str = "telepresence=true";

/// Pod label values distinguishing session-wide pods from client pods.
pub(crate) const SESSION_POD_TYPE: &str = "session";
pub(crate) const CLIENT_POD_TYPE: &str = "client";

/// Suffix appended to a pod name to form its service name.
pub(crate) const SERVICE_SUFFIX: &str = "-svc";

/// Name of the singleton ingress in the workload namespace.
pub(crate) const INGRESS_NAME: &str = "ingress";
