use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{ListParams, PostParams},
    error::ErrorResponse,
    runtime::controller::Action,
    runtime::reflector::ObjectRef,
    runtime::Controller,
    Api, Client, ResourceExt,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::ingress::{
    build_service, garbage_collect_paths, null_empty_http_rule, publish_paths, scaffold_ingress,
    service_pod_name,
};
use crate::util::{
    Error, ERROR_REQUEUE, INGRESS_NAME, SERVICE_SUFFIX, TELEPRESENCE_SELECTOR, WORKLOAD_NAMESPACE,
};

#[cfg(feature = "metrics")]
use super::metrics::{INGRESS_UPDATE_COUNTER, NETWORK_RECONCILE_COUNTER};

/// Entrypoint for the network controller.
///
/// The reconciler is a singleton: every labeled pod or service event maps to
/// the workload namespace object, which always exists, and one cycle derives
/// the full service set and ingress path set from the live cluster state.
pub async fn run(client: Client) -> Result<(), Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let root = ListParams::default().fields(&format!("metadata.name={}", WORKLOAD_NAMESPACE));
    let labeled = ListParams::default().labels(TELEPRESENCE_SELECTOR);
    let pods: Api<Pod> = Api::namespaced(client.clone(), WORKLOAD_NAMESPACE);
    let services: Api<Service> = Api::namespaced(client.clone(), WORKLOAD_NAMESPACE);
    let context = Arc::new(ContextData::new(client));

    Controller::new(namespaces, root)
        .watches(pods, labeled.clone(), |_| {
            Some(ObjectRef::<Namespace>::new(WORKLOAD_NAMESPACE))
        })
        .watches(services, labeled, |_| {
            Some(ObjectRef::<Namespace>::new(WORKLOAD_NAMESPACE))
        })
        .run(reconcile, on_error, context)
        .for_each(|result| async move {
            match result {
                Ok(_) => trace!("network reconciled"),
                Err(err) => trace!("reconciliation failed: {}", err),
            }
        })
        .await;
    Ok(())
}

/// Context injected with each `reconcile` and `on_error` invocation.
struct ContextData {
    client: Client,
}

impl ContextData {
    fn new(client: Client) -> Self {
        ContextData { client }
    }
}

async fn reconcile(_root: Arc<Namespace>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    debug!("network controller triggered");

    #[cfg(feature = "metrics")]
    NETWORK_RECONCILE_COUNTER.inc();

    let labeled = ListParams::default().labels(TELEPRESENCE_SELECTOR);
    let pod_api: Api<Pod> = Api::namespaced(client.clone(), WORKLOAD_NAMESPACE);
    let service_api: Api<Service> = Api::namespaced(client.clone(), WORKLOAD_NAMESPACE);

    let pods = pod_api.list(&labeled).await?.items;
    let pod_names: BTreeSet<String> = pods.iter().map(|pod| pod.name_any()).collect();

    // Live services, with orphans (their pod is gone) deleted along the way.
    let mut services: BTreeMap<String, Service> = BTreeMap::new();
    for service in service_api.list(&labeled).await?.items {
        let service_name = service.name_any();
        let pod_name = match service_pod_name(&service_name) {
            Some(pod_name) => pod_name,
            None => {
                warn!(service = %service_name, "skipping service with foreign name");
                continue;
            }
        };
        if pod_names.contains(pod_name) {
            services.insert(service_name, service);
        } else {
            debug!(service = %service_name, "deleting orphaned service");
            match service_api.delete(&service_name, &Default::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    // Every labeled pod gets a service mirroring its container ports.
    for pod in &pods {
        let service_name = format!("{}{}", pod.name_any(), SERVICE_SUFFIX);
        if services.contains_key(&service_name) {
            continue;
        }
        let service = build_service(pod);
        match service_api.create(&PostParams::default(), &service).await {
            Ok(created) => {
                services.insert(service_name, created);
            }
            Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {
                services.insert(service_name, service);
            }
            Err(err) => return Err(err.into()),
        }
    }

    reconcile_ingress(client, &services).await?;

    Ok(Action::await_change())
}

async fn reconcile_ingress(
    client: Client,
    services: &BTreeMap<String, Service>,
) -> Result<(), Error> {
    let api: Api<Ingress> = Api::namespaced(client, WORKLOAD_NAMESPACE);

    let mut scaffolded = false;
    let mut ingress = match api.get(INGRESS_NAME).await {
        Ok(ingress) => ingress,
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {
            scaffolded = true;
            scaffold_ingress()
        }
        Err(err) => return Err(err.into()),
    };

    let collected = garbage_collect_paths(&mut ingress, services);
    let published = publish_paths(&mut ingress, services);
    null_empty_http_rule(&mut ingress);

    if scaffolded {
        debug!("creating ingress");
        match api.create(&PostParams::default(), &ingress).await {
            Ok(_) => {}
            Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {}
            Err(err) => return Err(err.into()),
        }
    } else if collected || published {
        debug!("updating ingress paths");
        api.replace(INGRESS_NAME, &PostParams::default(), &ingress)
            .await?;
    } else {
        return Ok(());
    }

    #[cfg(feature = "metrics")]
    INGRESS_UPDATE_COUNTER.inc();

    Ok(())
}

/// Requeues with a delay whenever a reconciliation fails.
fn on_error(_root: Arc<Namespace>, error: &Error, _context: Arc<ContextData>) -> Action {
    warn!("network reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}
