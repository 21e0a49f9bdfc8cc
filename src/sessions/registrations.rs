use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{ObjectMeta, PostParams},
    error::ErrorResponse,
    Api, Client, ResourceExt,
};
use telepresence_types::{GCRegistration, GCRegistrationSpec, GCRegistrationType, Session, SessionRef};
use tracing::{debug, error};

use crate::util::{Error, GC_NAMESPACE};

/// Creates the GC namespace. `AlreadyExists` is success.
async fn ensure_gc_namespace(client: Client) -> Result<(), Error> {
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(GC_NAMESPACE.to_owned()),
            ..Default::default()
        },
        ..Default::default()
    };
    let api: Api<Namespace> = Api::all(client);
    match api.create(&PostParams::default(), &namespace).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => Ok(()),
        Err(err) => {
            error!("unable to create gc namespace: {}", err);
            Err(err.into())
        }
    }
}

/// Registers a pod for garbage collection. The registration is named after
/// the pod and starts in the `Timeout` state; `AlreadyExists` is success.
pub async fn create_registration(
    client: Client,
    session: &Session,
    pod_name: &str,
) -> Result<(), Error> {
    ensure_gc_namespace(client.clone()).await?;

    let registration = GCRegistration {
        metadata: ObjectMeta {
            name: Some(pod_name.to_owned()),
            namespace: Some(GC_NAMESPACE.to_owned()),
            ..Default::default()
        },
        spec: GCRegistrationSpec {
            session: SessionRef {
                name: session.name_any(),
                namespace: session.namespace().unwrap_or_default(),
            },
            type_: GCRegistrationType::Timeout,
        },
    };

    let api: Api<GCRegistration> = Api::namespaced(client, GC_NAMESPACE);
    match api.create(&PostParams::default(), &registration).await {
        Ok(_) => {
            debug!(pod = pod_name, "registered pod for gc");
            Ok(())
        }
        Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => Ok(()),
        Err(err) => {
            error!(
                session = %session.name_any(),
                pod = pod_name,
                "unable to create gc registration: {}",
                err
            );
            Err(err.into())
        }
    }
}

/// Retracts a pod's registration; the pod picked up a connected client again.
/// `NotFound` is success.
pub async fn delete_registration(client: Client, pod_name: &str) -> Result<(), Error> {
    let api: Api<GCRegistration> = Api::namespaced(client, GC_NAMESPACE);
    match api.delete(pod_name, &Default::default()).await {
        Ok(_) => {
            debug!(pod = pod_name, "retracted gc registration");
            Ok(())
        }
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(()),
        Err(err) => {
            error!(pod = pod_name, "unable to delete gc registration: {}", err);
            Err(err.into())
        }
    }
}
