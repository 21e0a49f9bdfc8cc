//! Pure editing of the singleton ingress. The path set is derived from the
//! live services on every cycle; nothing network-related is cached across
//! reconciles.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ObjectMeta;
use kube::Resource;
use std::collections::{BTreeMap, BTreeSet};

use crate::util::{INGRESS_NAME, SERVICE_SUFFIX, WORKLOAD_NAMESPACE};

/// Pod name encoded in a service name, or `None` for foreign services.
pub fn service_pod_name(service_name: &str) -> Option<&str> {
    service_name.strip_suffix(SERVICE_SUFFIX)
}

/// Pod name encoded in an ingress path of the form `/<pod>/<port>(/|$)(.*)`.
pub fn path_pod_name(path: &str) -> Option<&str> {
    path.split('/').nth(1)
}

/// The service mirroring a pod's container ports. Ports default to
/// `{TCP, 8080, "default"}` when the containers declare none. The owner
/// reference makes the pod cascade clean the service up.
pub fn build_service(pod: &Pod) -> Service {
    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let mut ports: Vec<ServicePort> = Vec::new();
    if let Some(spec) = pod.spec.as_ref() {
        for container in &spec.containers {
            if let Some(container_ports) = container.ports.as_ref() {
                for port in container_ports {
                    ports.push(ServicePort {
                        protocol: port.protocol.clone(),
                        port: port.container_port,
                        name: port.name.clone(),
                        ..Default::default()
                    });
                }
            }
        }
    }
    if ports.is_empty() {
        ports.push(ServicePort {
            protocol: Some("TCP".to_owned()),
            port: 8080,
            name: Some("default".to_owned()),
            ..Default::default()
        });
    }

    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}{}", pod_name, SERVICE_SUFFIX)),
            namespace: Some(WORKLOAD_NAMESPACE.to_owned()),
            labels: Some(
                vec![("telepresence".to_owned(), "true".to_owned())]
                    .into_iter()
                    .collect(),
            ),
            owner_references: pod.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(ports),
            selector: Some(
                vec![("svc".to_owned(), pod_name)].into_iter().collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// An empty ingress with the rewrite annotations and TLS block in place.
pub fn scaffold_ingress() -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(INGRESS_NAME.to_owned()),
            namespace: Some(WORKLOAD_NAMESPACE.to_owned()),
            annotations: Some(
                vec![
                    (
                        "nginx.ingress.kubernetes.io/use-regex".to_owned(),
                        "true".to_owned(),
                    ),
                    (
                        "nginx.ingress.kubernetes.io/rewrite-target".to_owned(),
                        "/$2".to_owned(),
                    ),
                ]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            tls: Some(vec![IngressTLS {
                hosts: Some(vec!["localhost".to_owned()]),
                secret_name: Some("tls".to_owned()),
            }]),
            rules: Some(vec![IngressRule {
                host: None,
                http: Some(HTTPIngressRuleValue { paths: Vec::new() }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn http_paths_mut(ingress: &mut Ingress) -> &mut Vec<HTTPIngressPath> {
    let spec = ingress.spec.get_or_insert_with(Default::default);
    let rules = spec.rules.get_or_insert_with(Vec::new);
    if rules.is_empty() {
        rules.push(IngressRule {
            host: None,
            http: None,
        });
    }
    &mut rules[0]
        .http
        .get_or_insert_with(|| HTTPIngressRuleValue { paths: Vec::new() })
        .paths
}

/// Drops every path whose pod no longer has a live service.
pub fn garbage_collect_paths(
    ingress: &mut Ingress,
    services: &BTreeMap<String, Service>,
) -> bool {
    let paths = http_paths_mut(ingress);
    let before = paths.len();
    paths.retain(|entry| {
        entry
            .path
            .as_deref()
            .and_then(path_pod_name)
            .map_or(false, |pod| {
                services.contains_key(&format!("{}{}", pod, SERVICE_SUFFIX))
            })
    });
    paths.len() != before
}

/// Appends a path per port for every service not yet covered.
pub fn publish_paths(ingress: &mut Ingress, services: &BTreeMap<String, Service>) -> bool {
    let paths = http_paths_mut(ingress);
    let covered: BTreeSet<String> = paths
        .iter()
        .filter_map(|entry| entry.path.as_deref())
        .filter_map(path_pod_name)
        .map(str::to_owned)
        .collect();

    let mut updated = false;
    for (service_name, service) in services {
        let pod_name = match service_pod_name(service_name) {
            Some(pod_name) => pod_name,
            None => continue,
        };
        if covered.contains(pod_name) {
            continue;
        }
        let ports = service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref());
        if let Some(ports) = ports {
            for port in ports {
                updated = true;
                paths.push(HTTPIngressPath {
                    path: Some(format!(
                        "/{}/{}(/|$)(.*)",
                        pod_name,
                        port.name.as_deref().unwrap_or_default()
                    )),
                    path_type: "ImplementationSpecific".to_owned(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: service_name.clone(),
                            port: Some(ServiceBackendPort {
                                number: Some(port.port),
                                name: None,
                            }),
                        }),
                        resource: None,
                    },
                });
            }
        }
    }
    updated
}

/// The store rejects an ingress with an empty path list, so an emptied rule
/// is nulled instead.
pub fn null_empty_http_rule(ingress: &mut Ingress) {
    let rule = ingress
        .spec
        .as_mut()
        .and_then(|spec| spec.rules.as_mut())
        .and_then(|rules| rules.first_mut());
    if let Some(rule) = rule {
        let empty = rule
            .http
            .as_ref()
            .map_or(false, |http| http.paths.is_empty());
        if empty {
            rule.http = None;
        }
    }
}
