use k8s_openapi::api::networking::v1::Ingress;
use kube::{error::ErrorResponse, Api, Client, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use telepresence_types::{GCRegistration, PodStatus, Session};
use tracing::debug;

use super::registrations;
use crate::util::conditions::{
    set_ready_condition, GET_PODS_FAILED_MESSAGE, GET_PODS_FAILED_REASON, PODS_NOT_READY_MESSAGE,
    PODS_NOT_READY_REASON, PODS_READY_MESSAGE, PODS_READY_REASON, PODS_RECONCILED_MESSAGE,
    PODS_RECONCILED_REASON,
};
use crate::util::{index, pods, Error, INGRESS_NAME, SESSION_POD_TYPE, WORKLOAD_NAMESPACE};

/// The session-pods pass: one pod per template, shared by every client.
/// Publishes a fresh `sessionPods` status each cycle, spawns missing pods
/// while clients are connected, and keeps the session-level GC registrations
/// keyed on "zero connected clients".
pub async fn reconcile_session_pods(
    client: Client,
    session: &mut Session,
    registrations: &[GCRegistration],
) -> Result<(), Error> {
    let session_name = session.name_any();
    let connected_clients = session
        .spec
        .clients
        .values()
        .filter(|connected| **connected)
        .count();

    let observed = match index::list_session_pods(client.clone(), session, SESSION_POD_TYPE).await
    {
        Ok(pods) => pods,
        Err(err) => {
            set_ready_condition(
                session,
                "Unknown",
                GET_PODS_FAILED_REASON,
                GET_PODS_FAILED_MESSAGE,
            );
            return Err(err);
        }
    };

    let external_ip = ingress_external_ip(client.clone()).await?;

    // The pod status block is rebuilt from scratch every cycle.
    let templates = session.spec.session_pod_templates.clone();
    let mut pods_status = BTreeMap::new();
    for template in &templates {
        let pod_name = format!("{}-{}", session_name, template.name);
        pods_status.insert(
            pod_name.clone(),
            PodStatus {
                paths: pods::build_pod_paths(&pod_name, &template.template, external_ip.as_deref()),
                ready: false,
            },
        );
    }

    if observed.len() == templates.len() {
        let ready = pods::pods_are_ready(&observed) && external_ip.is_some();
        if ready {
            for status in pods_status.values_mut() {
                status.ready = true;
            }
            set_ready_condition(session, "True", PODS_READY_REASON, PODS_READY_MESSAGE);
        } else {
            set_ready_condition(
                session,
                "False",
                PODS_NOT_READY_REASON,
                PODS_NOT_READY_MESSAGE,
            );
        }
    } else if connected_clients > 0 {
        let observed_names: BTreeSet<String> =
            observed.iter().map(|pod| pod.name_any()).collect();
        for template in &templates {
            let pod_name = format!("{}-{}", session_name, template.name);
            if !observed_names.contains(&pod_name) {
                debug!(session = %session_name, pod = %pod_name, "spawning session pod");
                pods::spawn_pod(
                    client.clone(),
                    session,
                    &pod_name,
                    SESSION_POD_TYPE,
                    &template.template,
                )
                .await?;
            }
        }
        set_ready_condition(
            session,
            "Unknown",
            PODS_RECONCILED_REASON,
            PODS_RECONCILED_MESSAGE,
        );
    }

    session
        .status
        .get_or_insert_with(Default::default)
        .session_pods
        .pods_status = pods_status;

    // Session pods are reclaimable exactly while nobody is connected.
    let existing: BTreeSet<String> = registrations
        .iter()
        .map(|registration| registration.name_any())
        .collect();
    for template in &templates {
        let pod_name = format!("{}-{}", session_name, template.name);
        if connected_clients == 0 && !existing.contains(&pod_name) {
            registrations::create_registration(client.clone(), session, &pod_name).await?;
        } else if connected_clients > 0 && existing.contains(&pod_name) {
            registrations::delete_registration(client.clone(), &pod_name).await?;
        }
    }

    Ok(())
}

/// External IP of the singleton ingress, once the load balancer published it.
async fn ingress_external_ip(client: Client) -> Result<Option<String>, Error> {
    let api: Api<Ingress> = Api::namespaced(client, WORKLOAD_NAMESPACE);
    let ingress = match api.get(INGRESS_NAME).await {
        Ok(ingress) => ingress,
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(ingress
        .status
        .and_then(|status| status.load_balancer)
        .and_then(|lb| lb.ingress)
        .and_then(|entries| entries.into_iter().next())
        .and_then(|entry| entry.ip))
}
