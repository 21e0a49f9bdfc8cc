use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{ListParams, PostParams},
    error::ErrorResponse,
    runtime::controller::Action,
    runtime::Controller,
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use telepresence_types::Session;
use tracing::{debug, trace, warn};

use super::{client_pods, session_pods};
use crate::util::{
    index, pods, status, Error, CLIENT_POD_TYPE, ERROR_REQUEUE, TELEPRESENCE_SELECTOR,
    WORKLOAD_NAMESPACE,
};

#[cfg(feature = "metrics")]
use super::metrics::SESSION_RECONCILE_COUNTER;

/// Entrypoint for the `Session` controller.
pub async fn run(client: Client) -> Result<(), Error> {
    let sessions: Api<Session> = Api::all(client.clone());
    let owned_pods: Api<Pod> = Api::namespaced(client.clone(), WORKLOAD_NAMESPACE);
    let context = Arc::new(ContextData::new(client));

    Controller::new(sessions, ListParams::default())
        .owns(owned_pods, ListParams::default().labels(TELEPRESENCE_SELECTOR))
        .run(reconcile, on_error, context)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => trace!(session = %object.name, "reconciled"),
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

async fn reconcile(instance: Arc<Session>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInputError(
            "Expected Session resource to be namespaced. Can't reconcile an unknown namespace."
                .to_owned(),
        )
    })?;
    let name = instance.name_any();
    debug!(session = %name, namespace = %namespace, "controller triggered");

    #[cfg(feature = "metrics")]
    SESSION_RECONCILE_COUNTER
        .with_label_values(&[&name, &namespace])
        .inc();

    // Work on a fresh copy; the watch cache can lag behind our own writes.
    let api: Api<Session> = Api::namespaced(client.clone(), &namespace);
    let mut session = match api.get(&name).await {
        Ok(session) => session,
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {
            // Deleted; the owner cascade cleans up the workload.
            return Ok(Action::await_change());
        }
        Err(err) => return Err(err.into()),
    };

    let registrations = index::list_session_registrations(client.clone(), &name).await?;
    let old_hash = status::recorded_hash(&session);

    if !session.spec.clients.is_empty() && !session.spec.session_pod_templates.is_empty() {
        if let Err(err) =
            session_pods::reconcile_session_pods(client.clone(), &mut session, &registrations)
                .await
        {
            // Publish the failure condition even though the cycle aborts.
            if let Ok(bytes) = serde_json::to_vec(&session) {
                let _ = api
                    .replace_status(&name, &PostParams::default(), bytes)
                    .await;
            }
            return Err(err);
        }
    }

    let mut to_spawn = Vec::new();
    if !session.spec.client_pod_templates.is_empty() {
        to_spawn =
            client_pods::reconcile_client_pods(client.clone(), &mut session, &registrations)
                .await?;
    }

    let current_status = session.status.clone().unwrap_or_default();
    let new_hash = status::hash_status(&current_status)?;
    if status::status_has_changed(old_hash.as_deref(), &new_hash) {
        status::set_hash_annotation(&mut session, &new_hash);
        let pp = PostParams::default();
        // The annotation lives on the object, the rest on the status
        // subresource; the second write reuses the resourceVersion returned
        // by the first.
        let mut updated = api.replace(&name, &pp, &session).await?;
        updated.status = Some(current_status);
        api.replace_status(&name, &pp, serde_json::to_vec(&updated)?)
            .await?;
    }

    for spawn in to_spawn {
        pods::spawn_pod(
            client.clone(),
            &session,
            &spawn.name,
            CLIENT_POD_TYPE,
            &spawn.template,
        )
        .await?;
    }

    Ok(Action::await_change())
}

/// Requeues the session with a delay whenever a reconciliation fails.
fn on_error(instance: Arc<Session>, error: &Error, _context: Arc<ContextData>) -> Action {
    warn!(session = %instance.name_any(), "reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}
