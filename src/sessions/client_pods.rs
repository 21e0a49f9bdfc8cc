use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Client, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use telepresence_types::{GCRegistration, Session};
use tracing::debug;

use super::allocator::{self, AllocationMap, PodSpawn};
use super::registrations;
use crate::util::{index, pods, Error, CLIENT_POD_TYPE};

/// The client-pods pass: expires and rebinds clients, allocates newcomers,
/// keeps GC registrations in lockstep with pod idleness, and reports pod
/// readiness into the status. Pods that need to be created are returned so
/// the caller can spawn them after the status write.
pub async fn reconcile_client_pods(
    client: Client,
    session: &mut Session,
    registrations: &[GCRegistration],
) -> Result<Vec<PodSpawn>, Error> {
    let now = Time(Utc::now());
    let session_name = session.name_any();

    let cluster_pods = index::list_session_pods(client.clone(), session, CLIENT_POD_TYPE).await?;
    let observed_ready: BTreeMap<String, bool> = cluster_pods
        .iter()
        .map(|pod| (pod.name_any(), pods::pod_is_ready(pod)))
        .collect();

    let spec_clients = session.spec.clients.clone();
    let templates = session.spec.client_pod_templates.clone();
    let timeout_seconds = session.spec.timeout_seconds;
    let status_clients = &mut session
        .status
        .get_or_insert_with(Default::default)
        .clients;

    // Clients whose reconnection grace period ran out free their bindings
    // before allocation; their pods become reclaimable in this same cycle.
    allocator::clean_expired_clients(&now, status_clients, timeout_seconds);
    allocator::remove_departed_clients(&spec_clients, status_clients);
    let new_clients = allocator::handle_client_changes(&now, &spec_clients, status_clients);

    let mut alloc = AllocationMap::init(&templates);
    let mut reutilize =
        allocator::template_pod_mapping(observed_ready.keys().map(String::as_str));
    alloc.fold_status(status_clients, &mut reutilize);

    if !new_clients.is_empty() {
        debug!(session = %session_name, clients = new_clients.len(), "allocating new clients");
        alloc.sort();
        alloc.allocate_clients(
            &new_clients,
            &session_name,
            status_clients,
            &mut reutilize,
            || uuid::Uuid::new_v4().to_string()[..4].to_owned(),
        );
    }

    let existing: BTreeSet<String> = registrations
        .iter()
        .map(|registration| registration.name_any())
        .collect();
    let (to_create, to_delete) = allocator::registration_changes(&alloc, &reutilize, &existing);

    let to_spawn = allocator::reconcile_pods(&alloc, status_clients, &observed_ready);

    for pod_name in to_create {
        registrations::create_registration(client.clone(), session, &pod_name).await?;
    }
    for pod_name in to_delete {
        registrations::delete_registration(client.clone(), &pod_name).await?;
    }

    Ok(to_spawn)
}
