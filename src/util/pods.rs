use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use kube::{
    api::{ObjectMeta, PostParams},
    error::ErrorResponse,
    Api, Client, Resource, ResourceExt,
};
use telepresence_types::Session;
use tracing::{error, warn};

use super::{Error, WORKLOAD_NAMESPACE};

/// Extracts the template name from a client pod name of the form
/// `<session>-<template>-<suffix>`. Returns `None` for names with fewer than
/// three segments; callers log and skip those.
pub fn client_template_segment(pod_name: &str) -> Option<&str> {
    let mut segments = pod_name.split('-');
    let _session = segments.next()?;
    let template = segments.next()?;
    segments.next()?;
    Some(template)
}

/// The final `-`-separated segment of a pod name, used as the deterministic
/// allocation tie-break. Names without a dash order by their full name.
pub fn trailing_suffix(pod_name: &str) -> &str {
    match pod_name.rfind('-') {
        Some(i) => &pod_name[i + 1..],
        None => pod_name,
    }
}

/// Status of the pod's `Ready` condition. A missing condition counts as not
/// ready; the pod is still pending.
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map_or(false, |conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

pub fn pods_are_ready(pods: &[Pod]) -> bool {
    pods.iter().all(pod_is_ready)
}

/// Paths under which the template's container ports are published, one entry
/// per port: `/<pod>/<portName>`, optionally prefixed (session pods carry the
/// ingress external IP as prefix once it is known).
pub fn build_pod_paths(pod_name: &str, template: &PodTemplateSpec, prefix: Option<&str>) -> Vec<String> {
    let mut paths = Vec::new();
    let containers = match template.spec.as_ref() {
        Some(spec) => &spec.containers,
        None => return paths,
    };
    for container in containers {
        if let Some(ports) = container.ports.as_ref() {
            for port in ports {
                let port_name = port.name.as_deref().unwrap_or_default();
                paths.push(format!(
                    "{}/{}/{}",
                    prefix.unwrap_or_default(),
                    pod_name,
                    port_name
                ));
            }
        }
    }
    paths
}

/// Creates a workload pod owned by the session. The pod carries the labels
/// the network controller keys on. `AlreadyExists` is success.
pub async fn spawn_pod(
    client: Client,
    session: &Session,
    pod_name: &str,
    pod_type: &str,
    template: &PodTemplateSpec,
) -> Result<(), Error> {
    let mut labels = template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    labels.insert("type".to_owned(), pod_type.to_owned());
    labels.insert("svc".to_owned(), pod_name.to_owned());
    labels.insert("telepresence".to_owned(), "true".to_owned());

    let pod = Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.to_owned()),
            namespace: Some(WORKLOAD_NAMESPACE.to_owned()),
            labels: Some(labels),
            // Owner reference so the owner cascade cleans up with the session.
            owner_references: Some(vec![session.controller_owner_ref(&()).unwrap()]),
            ..Default::default()
        },
        spec: template.spec.clone(),
        ..Default::default()
    };

    let api: Api<Pod> = Api::namespaced(client, WORKLOAD_NAMESPACE);
    match api.create(&PostParams::default(), &pod).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {
            warn!(pod = pod_name, "pod already exists");
            Ok(())
        }
        Err(err) => {
            error!(
                session = %session.name_any(),
                pod = pod_name,
                "unable to create pod: {}",
                err
            );
            Err(err.into())
        }
    }
}
