use chrono::Utc;
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{ListParams, PostParams},
    error::ErrorResponse,
    runtime::controller::Action,
    runtime::Controller,
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use telepresence_types::{GCRegistration, GCRegistrationType, Session};
use tracing::{debug, info, trace, warn};

use super::expiry::{expiry_action, ExpiryAction};
use crate::util::{Error, ERROR_REQUEUE, GC_NAMESPACE, GC_REQUEUE, WORKLOAD_NAMESPACE};

#[cfg(feature = "metrics")]
use super::metrics::{GC_RECONCILE_COUNTER, PODS_RECLAIMED_COUNTER};

/// Entrypoint for the `GCRegistration` controller.
pub async fn run(client: Client) -> Result<(), Error> {
    let registrations: Api<GCRegistration> = Api::namespaced(client.clone(), GC_NAMESPACE);
    let context = Arc::new(ContextData::new(client));

    Controller::new(registrations, ListParams::default())
        .run(reconcile, on_error, context)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => trace!(registration = %object.name, "reconciled"),
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

async fn reconcile(
    instance: Arc<GCRegistration>,
    context: Arc<ContextData>,
) -> Result<Action, Error> {
    let client = context.client.clone();
    let name = instance.name_any();
    debug!(registration = %name, "controller triggered");

    #[cfg(feature = "metrics")]
    GC_RECONCILE_COUNTER.with_label_values(&[&name]).inc();

    // The session's timeouts govern the deadlines. A missing session means
    // the owner cascade is already tearing everything down.
    let sessions: Api<Session> =
        Api::namespaced(client.clone(), &instance.spec.session.namespace);
    let session = match sessions.get(&instance.spec.session.name).await {
        Ok(session) => session,
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {
            return Ok(Action::requeue(GC_REQUEUE));
        }
        Err(err) => return Err(err.into()),
    };

    // Registration without a pod: a leftover, drop it.
    let pods: Api<Pod> = Api::namespaced(client.clone(), WORKLOAD_NAMESPACE);
    let registrations: Api<GCRegistration> = Api::namespaced(client.clone(), GC_NAMESPACE);
    match pods.get(&name).await {
        Ok(_) => {}
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {
            delete_ignoring_missing(&registrations, &name).await?;
            return Ok(Action::requeue(GC_REQUEUE));
        }
        Err(err) => return Err(err.into()),
    }

    // Work on a fresh copy; a demotion below needs the current resourceVersion.
    let mut registration = match registrations.get(&name).await {
        Ok(registration) => registration,
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {
            return Ok(Action::requeue(GC_REQUEUE));
        }
        Err(err) => return Err(err.into()),
    };

    let created = match registration.metadata.creation_timestamp.clone() {
        Some(created) => created,
        None => return Ok(Action::requeue(GC_REQUEUE)),
    };
    let now = Time(Utc::now());

    match expiry_action(
        registration.spec.type_,
        &created,
        &now,
        session.spec.timeout_seconds,
        session.spec.reutilize_timeout_seconds,
    ) {
        Some(ExpiryAction::Reclaim) => {
            info!(registration = %name, "grace period over, reclaiming pod");
            delete_ignoring_missing(&pods, &name).await?;
            delete_ignoring_missing(&registrations, &name).await?;

            #[cfg(feature = "metrics")]
            PODS_RECLAIMED_COUNTER.with_label_values(&[&name]).inc();
        }
        Some(ExpiryAction::Demote) => {
            debug!(registration = %name, "keeping pod warm for reuse");
            registration.spec.type_ = GCRegistrationType::ReutilizeTimeout;
            registrations
                .replace(&name, &PostParams::default(), &registration)
                .await?;
        }
        None => {}
    }

    Ok(Action::requeue(GC_REQUEUE))
}

async fn delete_ignoring_missing<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Requeues the registration with a delay whenever a reconciliation fails.
fn on_error(instance: Arc<GCRegistration>, error: &Error, _context: Arc<ContextData>) -> Action {
    warn!(registration = %instance.name_any(), "reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}
