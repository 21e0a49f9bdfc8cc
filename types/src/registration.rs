use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Reference to the [`Session`](crate::Session) a registration belongs to.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SessionRef {
    /// Name of the `Session` resource.
    pub name: String,

    /// Namespace of the `Session` resource.
    pub namespace: String,
}

/// [`GCRegistrationSpec`] records that a pod currently serves zero connected
/// clients and is eligible for reclamation. The session controller creates
/// one registration per idle pod (named after the pod, in the dedicated GC
/// namespace) and deletes it again when the pod picks up a client; the GC
/// controller walks registrations through the
/// [`Timeout`](GCRegistrationType::Timeout) →
/// [`ReutilizeTimeout`](GCRegistrationType::ReutilizeTimeout) expiry machine
/// and finally deletes the pod.
///
/// Note: this resource is only for internal use by the controllers, and
/// should never be created or manipulated directly.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "telepresence.dev",
    version = "v1alpha1",
    kind = "GCRegistration",
    plural = "gcregistrations",
    derive = "PartialEq",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.type\", \"name\": \"TYPE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.session.name\", \"name\": \"SESSION\", \"type\": \"string\" }"
)]
pub struct GCRegistrationSpec {
    /// The session owning the registered pod. The session's timeouts govern
    /// the expiry deadlines.
    pub session: SessionRef,

    /// Current state of the expiry machine. Both deadlines are measured from
    /// the registration's creation timestamp.
    #[serde(rename = "type")]
    pub type_: GCRegistrationType,
}

/// State of a registration's expiry machine.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, JsonSchema)]
pub enum GCRegistrationType {
    /// Initial grace period of `timeoutSeconds` after the pod went idle.
    #[default]
    Timeout,

    /// The pod stays warm for reuse until
    /// `timeoutSeconds + reutilizeTimeoutSeconds` past registration.
    ReutilizeTimeout,
}

impl FromStr for GCRegistrationType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Timeout" => Ok(GCRegistrationType::Timeout),
            "ReutilizeTimeout" => Ok(GCRegistrationType::ReutilizeTimeout),
            _ => Err(()),
        }
    }
}

impl fmt::Display for GCRegistrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GCRegistrationType::Timeout => write!(f, "Timeout"),
            GCRegistrationType::ReutilizeTimeout => write!(f, "ReutilizeTimeout"),
        }
    }
}
