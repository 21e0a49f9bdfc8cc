use k8s_openapi::api::core::v1::Pod;
use kube::{api::ListParams, Api, Client};
use telepresence_types::{GCRegistration, Session};

use super::{Error, GC_NAMESPACE, WORKLOAD_NAMESPACE};

/// Returns `true` when the object's controller owner reference points at the
/// given session. Matching by uid guards against a session that was deleted
/// and recreated under the same name.
pub fn owned_by_session(pod: &Pod, session: &Session) -> bool {
    let uid = match session.metadata.uid.as_deref() {
        Some(uid) => uid,
        None => return false,
    };
    pod.metadata
        .owner_references
        .as_ref()
        .map_or(false, |owners| {
            owners.iter().any(|owner| {
                owner.controller == Some(true) && owner.kind == "Session" && owner.uid == uid
            })
        })
}

/// Lists the session's workload pods of one type (`session` or `client`).
/// Stands in for an owner+type field index: the label selector narrows the
/// list server-side, the owner reference check scopes it to this session.
pub async fn list_session_pods(
    client: Client,
    session: &Session,
    pod_type: &str,
) -> Result<Vec<Pod>, Error> {
    let api: Api<Pod> = Api::namespaced(client, WORKLOAD_NAMESPACE);
    let lp = ListParams::default().labels(&format!("type={}", pod_type));
    let pods = api
        .list(&lp)
        .await?
        .items
        .into_iter()
        .filter(|pod| owned_by_session(pod, session))
        .collect();
    Ok(pods)
}

/// Lists the GC registrations belonging to one session, by `spec.session.name`.
pub async fn list_session_registrations(
    client: Client,
    session_name: &str,
) -> Result<Vec<GCRegistration>, Error> {
    let api: Api<GCRegistration> = Api::namespaced(client, GC_NAMESPACE);
    let registrations = api
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|r| r.spec.session.name == session_name)
        .collect();
    Ok(registrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    fn session_with_uid(uid: &str) -> Session {
        let mut session = Session::default();
        session.metadata.uid = Some(uid.to_owned());
        session
    }

    fn pod_owned_by(kind: &str, uid: &str, controller: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                owner_references: Some(vec![OwnerReference {
                    api_version: "telepresence.dev/v1alpha1".to_owned(),
                    kind: kind.to_owned(),
                    name: "s".to_owned(),
                    uid: uid.to_owned(),
                    controller: Some(controller),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn ownership_requires_kind_uid_and_controller() {
        let session = session_with_uid("u1");
        assert!(owned_by_session(&pod_owned_by("Session", "u1", true), &session));
        assert!(!owned_by_session(&pod_owned_by("Session", "u2", true), &session));
        assert!(!owned_by_session(&pod_owned_by("ReplicaSet", "u1", true), &session));
        assert!(!owned_by_session(&pod_owned_by("Session", "u1", false), &session));
        assert!(!owned_by_session(&Pod::default(), &session));
    }

}
