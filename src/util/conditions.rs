use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use telepresence_types::Session;

pub const TYPE_READY: &str = "Ready";

pub const GET_PODS_FAILED_REASON: &str = "FailedGetSessionPods";
pub const GET_PODS_FAILED_MESSAGE: &str = "Failed to get the session pods";

pub const PODS_READY_REASON: &str = "SessionPodsReady";
pub const PODS_READY_MESSAGE: &str =
    "All the session pods present the ready condition set to true";

pub const PODS_NOT_READY_REASON: &str = "SessionPodsNotReady";
pub const PODS_NOT_READY_MESSAGE: &str =
    "At least one session pod presents the ready condition set to false";

pub const PODS_RECONCILED_REASON: &str = "PodsHaveBeenReconciled";
pub const PODS_RECONCILED_MESSAGE: &str = "Pods have been reconciled successfully";

/// Replaces the `Ready` condition on the session. The transition time only
/// moves when the condition status actually changes, and an identical
/// condition is left untouched so the status hash stays stable.
pub fn set_ready_condition(session: &mut Session, status: &str, reason: &str, message: &str) {
    let conditions = &mut session
        .status
        .get_or_insert_with(Default::default)
        .session_pods
        .conditions;

    let previous = conditions.iter().position(|c| c.type_ == TYPE_READY);
    let transition_time = match previous {
        Some(i) => {
            let old = &conditions[i];
            if old.status == status && old.reason == reason && old.message == message {
                return;
            }
            if old.status == status {
                old.last_transition_time.clone()
            } else {
                Time(Utc::now())
            }
        }
        None => Time(Utc::now()),
    };

    let condition = Condition {
        type_: TYPE_READY.to_owned(),
        status: status.to_owned(),
        reason: reason.to_owned(),
        message: message.to_owned(),
        last_transition_time: transition_time,
        observed_generation: session.metadata.generation,
    };

    match previous {
        Some(i) => conditions[i] = condition,
        None => conditions.push(condition),
    }
}

/// Returns the status of the `Ready` condition, if present.
pub fn ready_condition(session: &Session) -> Option<&Condition> {
    session
        .status
        .as_ref()?
        .session_pods
        .conditions
        .iter()
        .find(|c| c.type_ == TYPE_READY)
}
