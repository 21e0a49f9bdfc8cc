use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use lazy_static::lazy_static;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

lazy_static! {
    /// Marker value for [`ClientStatus::last_seen_at`] meaning the client never
    /// lost its connection. The apiserver truncates timestamps to whole seconds,
    /// so comparisons against the sentinel happen at second precision.
    pub static ref NEVER_SEEN: Time = Time(
        DateTime::parse_from_rfc3339("0001-01-01T01:01:01.000000001Z")
            .expect("sentinel timestamp literal")
            .with_timezone(&Utc),
    );
}

/// Returns `true` when the timestamp is the [`NEVER_SEEN`] sentinel,
/// i.e. the client is currently connected.
pub fn is_never_seen(t: &Time) -> bool {
    t.0.timestamp() == NEVER_SEEN.0.timestamp()
}

/// A pod template shared by every client of the session. Exactly one pod is
/// created per template, named `<session>-<name>`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SessionPodTemplate {
    /// Template name. Becomes the second `-`-separated segment of the pod
    /// name, so it must not contain dashes itself.
    pub name: String,

    /// The pod to create for this template.
    pub template: PodTemplateSpec,
}

/// A pod template serving a bounded group of clients. Instances are named
/// `<session>-<name>-<4 hex chars>` and each one is shared by at most
/// [`max_clients`](ClientPodTemplate::max_clients) clients.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ClientPodTemplate {
    /// Template name. Becomes the second `-`-separated segment of the pod
    /// name, so it must not contain dashes itself.
    pub name: String,

    /// Maximum number of clients sharing one instance of this template.
    /// Must be at least 1.
    #[serde(rename = "maxClients")]
    pub max_clients: usize,

    /// The pod to create for each instance.
    pub template: PodTemplateSpec,
}

/// [`SessionSpec`] declares a shared interactive session: the pods that serve
/// every connected client together ([`session_pod_templates`](SessionSpec::session_pod_templates)),
/// the pods that serve bounded groups of clients
/// ([`client_pod_templates`](SessionSpec::client_pod_templates)), and the
/// per-client connection flags. The session-manager flips the `clients` map;
/// the controllers converge the cluster on it.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "telepresence.dev",
    version = "v1alpha1",
    kind = "Session",
    plural = "sessions",
    derive = "PartialEq",
    status = "SessionStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.timeoutSeconds\", \"name\": \"TIMEOUT\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.reutilizeTimeoutSeconds\", \"name\": \"REUTILIZE\", \"type\": \"integer\" }"
)]
pub struct SessionSpec {
    /// Pod templates instantiated once per session and shared by all clients.
    #[serde(rename = "sessionPodTemplates", default)]
    pub session_pod_templates: Vec<SessionPodTemplate>,

    /// Pod templates instantiated per group of clients with bounded fan-out.
    #[serde(rename = "clientPodTemplates", default)]
    pub client_pod_templates: Vec<ClientPodTemplate>,

    /// Grace period in seconds before a disconnected client is dropped from
    /// the status and its idle pods become reclaimable.
    #[serde(rename = "timeoutSeconds")]
    pub timeout_seconds: i64,

    /// Additional grace period in seconds during which an idle pod stays warm
    /// for reuse before it is deleted.
    #[serde(rename = "reutilizeTimeoutSeconds")]
    pub reutilize_timeout_seconds: i64,

    /// Connection flag per client id. Toggled by the session-manager.
    #[serde(default)]
    pub clients: BTreeMap<String, bool>,
}

/// Readiness and routing info for one pod, as published in the session status.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PodStatus {
    /// HTTP path prefixes under which the pod's ports are published.
    pub paths: Vec<String>,

    /// Whether the pod reported the `Ready` condition as true.
    pub ready: bool,
}

/// Per-client slice of the session status.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ClientStatus {
    /// When the client lost its connection, or the [`NEVER_SEEN`] sentinel
    /// while it is connected.
    #[serde(rename = "lastSeenAt")]
    pub last_seen_at: Time,

    /// Conjunction of the `ready` flags of every bound pod.
    pub ready: bool,

    /// The client's bound pods, keyed by pod name.
    #[serde(rename = "podStatus", default)]
    pub pod_status: BTreeMap<String, PodStatus>,
}

/// Status of the session-wide pods.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SessionPodsStatus {
    /// The session `Ready` condition lives here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// One entry per session pod template, keyed by pod name.
    #[serde(rename = "podsStatus", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pods_status: BTreeMap<String, PodStatus>,
}

/// Status object for the [`Session`] resource. All maps are ordered so the
/// serialized form is stable; the controller hashes it to suppress no-op
/// status writes.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SessionStatus {
    /// Status of the session-wide pods.
    #[serde(rename = "sessionPods", default)]
    pub session_pods: SessionPodsStatus,

    /// Status of every client still inside its reconnection grace period,
    /// keyed by client id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clients: BTreeMap<String, ClientStatus>,
}

impl ClientStatus {
    /// A fresh, not-yet-ready entry for a connected client.
    pub fn connected(pod_status: BTreeMap<String, PodStatus>) -> Self {
        ClientStatus {
            last_seen_at: NEVER_SEEN.clone(),
            ready: false,
            pod_status,
        }
    }
}
