//! Pure allocation core mapping `{connected clients} x {client pod templates}`
//! onto concrete pod instances. Everything here is deterministic: time and the
//! random pod suffix are injected by the caller, so the placement rules are
//! unit-testable without a cluster.

use chrono::Duration;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::{BTreeMap, BTreeSet};
use telepresence_types::{is_never_seen, ClientPodTemplate, ClientStatus, PodStatus, NEVER_SEEN};
use tracing::warn;

use crate::util::pods::{build_pod_paths, client_template_segment, trailing_suffix};

/// One client bound to a pod, with its current connection flag.
#[derive(Clone, Debug, PartialEq)]
pub struct PodClient {
    pub id: String,
    pub connected: bool,
}

/// A planned pod instance of one template and the clients bound to it.
#[derive(Clone, Debug)]
pub struct PodAllocation {
    pub name: String,
    pub clients: Vec<PodClient>,
}

/// All planned instances of one client pod template.
#[derive(Clone, Debug)]
pub struct TemplateAllocation {
    pub template: ClientPodTemplate,
    pub pods: Vec<PodAllocation>,
}

/// The allocation map, in spec order of the templates.
#[derive(Clone, Debug, Default)]
pub struct AllocationMap {
    pub entries: Vec<TemplateAllocation>,
}

/// Cluster-observed client pods grouped by template name. Pods still present
/// here after folding the status in are bound to nobody: the reutilization
/// pool.
pub type TemplatePodSet = BTreeMap<String, BTreeSet<String>>;

/// A pod that must be created once the status has been persisted.
#[derive(Clone, Debug)]
pub struct PodSpawn {
    pub name: String,
    pub template: PodTemplateSpec,
}

/// A client has expired once its disconnection is older than the timeout.
/// The sentinel "never left" value never expires.
pub fn client_has_expired(now: &Time, last_seen: &Time, timeout_seconds: i64) -> bool {
    if is_never_seen(last_seen) {
        return false;
    }
    last_seen.0 + Duration::seconds(timeout_seconds) <= now.0
}

/// Drops clients whose reconnection grace period has run out, freeing their
/// bindings before allocation.
pub fn clean_expired_clients(
    now: &Time,
    clients: &mut BTreeMap<String, ClientStatus>,
    timeout_seconds: i64,
) {
    clients.retain(|_, status| !client_has_expired(now, &status.last_seen_at, timeout_seconds));
}

/// Drops clients that left the spec entirely.
pub fn remove_departed_clients(
    spec_clients: &BTreeMap<String, bool>,
    status_clients: &mut BTreeMap<String, ClientStatus>,
) {
    status_clients.retain(|id, _| spec_clients.contains_key(id));
}

/// Compares spec clients against status clients. Newly connected clients are
/// returned for allocation; a lost connection stamps `lastSeenAt`; a
/// reconnection within the grace period resets it to the sentinel, keeping
/// the existing bindings.
pub fn handle_client_changes(
    now: &Time,
    spec_clients: &BTreeMap<String, bool>,
    status_clients: &mut BTreeMap<String, ClientStatus>,
) -> Vec<String> {
    let mut new_clients = Vec::new();

    for (id, connected) in spec_clients {
        match status_clients.get_mut(id) {
            Some(status) if !connected && is_never_seen(&status.last_seen_at) => {
                // client lost connection
                status.last_seen_at = now.clone();
            }
            None if *connected => {
                // new client found
                new_clients.push(id.clone());
            }
            Some(status) if *connected => {
                // client may have reconnected
                status.last_seen_at = NEVER_SEEN.clone();
            }
            _ => {}
        }
    }

    new_clients
}

/// Groups cluster-observed pod names by their template segment. Pods with a
/// malformed name are logged and skipped, never aborting the reconcile.
pub fn template_pod_mapping<'a>(pod_names: impl Iterator<Item = &'a str>) -> TemplatePodSet {
    let mut mapping = TemplatePodSet::new();
    for name in pod_names {
        match client_template_segment(name) {
            Some(template) => {
                mapping
                    .entry(template.to_owned())
                    .or_insert_with(BTreeSet::new)
                    .insert(name.to_owned());
            }
            None => warn!(pod = name, "skipping pod with malformed name"),
        }
    }
    mapping
}

impl AllocationMap {
    pub fn init(templates: &[ClientPodTemplate]) -> Self {
        AllocationMap {
            entries: templates
                .iter()
                .map(|template| TemplateAllocation {
                    template: template.clone(),
                    pods: Vec::new(),
                })
                .collect(),
        }
    }

    fn entry_mut(&mut self, template_name: &str) -> Option<&mut TemplateAllocation> {
        self.entries
            .iter_mut()
            .find(|entry| entry.template.name == template_name)
    }

    /// Folds the surviving status bindings into the map, consuming matching
    /// pods out of the reutilization pool. Existing bindings are never moved.
    pub fn fold_status(
        &mut self,
        status_clients: &BTreeMap<String, ClientStatus>,
        reutilize: &mut TemplatePodSet,
    ) {
        for (id, status) in status_clients {
            let client = PodClient {
                id: id.clone(),
                connected: is_never_seen(&status.last_seen_at),
            };
            for pod_name in status.pod_status.keys() {
                let template_name = match client_template_segment(pod_name) {
                    Some(name) => name.to_owned(),
                    None => {
                        warn!(pod = %pod_name, "skipping binding with malformed pod name");
                        continue;
                    }
                };
                if let Some(pool) = reutilize.get_mut(&template_name) {
                    pool.remove(pod_name);
                }
                let entry = match self.entry_mut(&template_name) {
                    Some(entry) => entry,
                    None => continue,
                };
                match entry.pods.iter_mut().find(|pod| &pod.name == pod_name) {
                    Some(pod) => pod.clients.push(client.clone()),
                    None => entry.pods.push(PodAllocation {
                        name: pod_name.clone(),
                        clients: vec![client.clone()],
                    }),
                }
            }
        }
    }

    /// Orders each template's pods ascending by (occupancy, trailing suffix)
    /// so that fill-first placement is deterministic.
    pub fn sort(&mut self) {
        for entry in &mut self.entries {
            entry.pods.sort_by(|a, b| {
                (a.clients.len(), trailing_suffix(&a.name))
                    .cmp(&(b.clients.len(), trailing_suffix(&b.name)))
            });
        }
    }

    /// Places every newly connected client on one pod per template: first pod
    /// with spare capacity, else the smallest pod of the reutilization pool,
    /// else a freshly named instance. Existing bindings are never evicted.
    pub fn allocate_clients(
        &mut self,
        new_clients: &[String],
        session_name: &str,
        status_clients: &mut BTreeMap<String, ClientStatus>,
        reutilize: &mut TemplatePodSet,
        mut new_suffix: impl FnMut() -> String,
    ) {
        for id in new_clients {
            let client = PodClient {
                id: id.clone(),
                connected: true,
            };
            let mut pod_status = BTreeMap::new();

            for entry in &mut self.entries {
                let max_clients = entry.template.max_clients.max(1);
                let available = entry
                    .pods
                    .iter_mut()
                    .find(|pod| pod.clients.len() < max_clients);

                let pod_name = match available {
                    Some(pod) => {
                        pod.clients.push(client.clone());
                        pod.name.clone()
                    }
                    None => {
                        let name = match pop_smallest(reutilize, &entry.template.name) {
                            Some(reused) => reused,
                            None => format!(
                                "{}-{}-{}",
                                session_name,
                                entry.template.name,
                                new_suffix()
                            ),
                        };
                        entry.pods.push(PodAllocation {
                            name: name.clone(),
                            clients: vec![client.clone()],
                        });
                        name
                    }
                };

                pod_status.insert(
                    pod_name.clone(),
                    PodStatus {
                        ready: false,
                        paths: build_pod_paths(&pod_name, &entry.template.template, None),
                    },
                );
            }

            status_clients.insert(id.clone(), ClientStatus::connected(pod_status));
        }
    }
}

/// Takes the lexicographically smallest pod out of the template's pool.
fn pop_smallest(reutilize: &mut TemplatePodSet, template_name: &str) -> Option<String> {
    let pool = reutilize.get_mut(template_name)?;
    let smallest = pool.iter().next().cloned()?;
    pool.remove(&smallest);
    Some(smallest)
}

pub fn pod_is_empty(pod: &PodAllocation) -> bool {
    !pod.clients.iter().any(|client| client.connected)
}

/// Which registrations to create and delete so that every idle pod carries
/// exactly one. Pods left in the reutilization pool serve nobody and need a
/// registration; planned pods need one exactly when they have no connected
/// client.
pub fn registration_changes(
    alloc: &AllocationMap,
    reutilize: &TemplatePodSet,
    existing: &BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let mut create = Vec::new();
    let mut delete = Vec::new();

    for pool in reutilize.values() {
        for pod_name in pool {
            if !existing.contains(pod_name) {
                create.push(pod_name.clone());
            }
        }
    }

    for entry in &alloc.entries {
        for pod in &entry.pods {
            let idle = pod_is_empty(pod);
            if idle && !existing.contains(&pod.name) {
                create.push(pod.name.clone());
            } else if !idle && existing.contains(&pod.name) {
                delete.push(pod.name.clone());
            }
        }
    }

    (create, delete)
}

/// Compares the planned pod set against the cluster-observed pods: missing
/// instances are returned for spawning, present ones propagate their `Ready`
/// condition into each bound client's status.
pub fn reconcile_pods(
    alloc: &AllocationMap,
    status_clients: &mut BTreeMap<String, ClientStatus>,
    observed_ready: &BTreeMap<String, bool>,
) -> Vec<PodSpawn> {
    let mut to_spawn = Vec::new();

    for entry in &alloc.entries {
        for pod in &entry.pods {
            match observed_ready.get(&pod.name) {
                Some(ready) => {
                    set_client_pod_readiness(*ready, &pod.name, &pod.clients, status_clients);
                }
                None => {
                    set_client_pod_readiness(false, &pod.name, &pod.clients, status_clients);
                    to_spawn.push(PodSpawn {
                        name: pod.name.clone(),
                        template: entry.template.template.clone(),
                    });
                }
            }
        }
    }

    to_spawn
}

fn set_client_pod_readiness(
    ready: bool,
    pod_name: &str,
    pod_clients: &[PodClient],
    status_clients: &mut BTreeMap<String, ClientStatus>,
) {
    for client in pod_clients {
        if let Some(status) = status_clients.get_mut(&client.id) {
            if let Some(pod_status) = status.pod_status.get_mut(pod_name) {
                pod_status.ready = ready;
            }
            status.ready = status.pod_status.values().all(|pod| pod.ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec};
    use telepresence_types::PodStatus;

    fn template(name: &str, max_clients: usize) -> ClientPodTemplate {
        ClientPodTemplate {
            name: name.to_owned(),
            max_clients,
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "main".to_owned(),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".to_owned()),
                            container_port: 8080,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    fn at(seconds: i64) -> Time {
        Time(Utc.timestamp_opt(seconds, 0).unwrap())
    }

    fn suffixes() -> impl FnMut() -> String {
        let mut counter = 0;
        move || {
            counter += 1;
            format!("{:04x}", counter)
        }
    }

    /// Runs one full allocation cycle against the given spec/status/cluster
    /// state and returns the pods to spawn.
    fn run_cycle(
        now: Time,
        spec_clients: &BTreeMap<String, bool>,
        status_clients: &mut BTreeMap<String, ClientStatus>,
        templates: &[ClientPodTemplate],
        cluster_pods: &[&str],
        observed_ready: &BTreeMap<String, bool>,
        timeout_seconds: i64,
        suffix: &mut impl FnMut() -> String,
    ) -> (AllocationMap, TemplatePodSet, Vec<PodSpawn>) {
        clean_expired_clients(&now, status_clients, timeout_seconds);
        remove_departed_clients(spec_clients, status_clients);
        let new_clients = handle_client_changes(&now, spec_clients, status_clients);

        let mut alloc = AllocationMap::init(templates);
        let mut reutilize = template_pod_mapping(cluster_pods.iter().copied());
        alloc.fold_status(status_clients, &mut reutilize);
        alloc.sort();
        alloc.allocate_clients(&new_clients, "s", status_clients, &mut reutilize, suffix);

        let spawns = reconcile_pods(&alloc, status_clients, observed_ready);
        (alloc, reutilize, spawns)
    }

    fn connected(ids: &[&str]) -> BTreeMap<String, bool> {
        ids.iter().map(|id| ((*id).to_owned(), true)).collect()
    }

    #[test]
    fn single_client_gets_one_pod_per_template() {
        let spec = connected(&["a"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2)];
        let (alloc, _, spawns) = run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            30,
            &mut suffixes(),
        );

        assert_eq!(alloc.entries[0].pods.len(), 1);
        assert_eq!(spawns.len(), 1);
        assert_eq!(spawns[0].name, "s-t-0001");
        let client = &status["a"];
        assert!(is_never_seen(&client.last_seen_at));
        assert!(!client.ready);
        assert_eq!(
            client.pod_status["s-t-0001"],
            PodStatus {
                paths: vec!["/s-t-0001/http".to_owned()],
                ready: false,
            }
        );
    }

    #[test]
    fn fan_out_splits_two_plus_one() {
        let spec = connected(&["a", "b", "c"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2)];
        let (alloc, _, spawns) = run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            30,
            &mut suffixes(),
        );

        assert_eq!(spawns.len(), 2);
        let pods = &alloc.entries[0].pods;
        assert_eq!(pods.len(), 2);
        let first: Vec<_> = pods[0].clients.iter().map(|c| c.id.as_str()).collect();
        let second: Vec<_> = pods[1].clients.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(pods[0].name, "s-t-0001");
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(pods[1].name, "s-t-0002");
        assert_eq!(second, vec!["c"]);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let spec = connected(&["a", "b", "c", "d", "e"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2), template("u", 1)];
        let (alloc, _, _) = run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            30,
            &mut suffixes(),
        );

        for entry in &alloc.entries {
            for pod in &entry.pods {
                assert!(pod.clients.len() <= entry.template.max_clients);
            }
        }
        // maxClients=1 forces one pod per client.
        assert_eq!(alloc.entries[1].pods.len(), 5);
    }

    #[test]
    fn every_connected_client_is_covered_exactly_once() {
        let spec = connected(&["a", "b", "c"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2), template("u", 3)];
        run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            30,
            &mut suffixes(),
        );

        for client in status.values() {
            for template in &templates {
                let bound: Vec<_> = client
                    .pod_status
                    .keys()
                    .filter(|pod| client_template_segment(pod) == Some(template.name.as_str()))
                    .collect();
                assert_eq!(bound.len(), 1);
            }
        }
    }

    #[test]
    fn existing_bindings_survive_reordering() {
        let spec = connected(&["a", "b"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2)];
        let mut suffix = suffixes();
        run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            30,
            &mut suffix,
        );
        let bound_before: BTreeMap<String, Vec<String>> = status
            .iter()
            .map(|(id, s)| (id.clone(), s.pod_status.keys().cloned().collect()))
            .collect();

        // Second cycle with the pod observed in the cluster: nothing moves.
        let cluster = ["s-t-0001"];
        let observed: BTreeMap<String, bool> =
            cluster.iter().map(|p| ((*p).to_owned(), true)).collect();
        let (_, _, spawns) = run_cycle(
            at(130),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            30,
            &mut suffix,
        );
        assert!(spawns.is_empty());
        for (id, pods) in bound_before {
            let now_bound: Vec<String> = status[&id].pod_status.keys().cloned().collect();
            assert_eq!(now_bound, pods);
        }
    }

    #[test]
    fn disconnect_stamps_last_seen_and_reconnect_rebinds() {
        let mut spec = connected(&["a", "b", "c"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2)];
        let mut suffix = suffixes();
        run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            60,
            &mut suffix,
        );
        let original_pod: Vec<String> = status["b"].pod_status.keys().cloned().collect();

        // b drops.
        spec.insert("b".to_owned(), false);
        let cluster = ["s-t-0001", "s-t-0002"];
        let observed: BTreeMap<String, bool> =
            cluster.iter().map(|p| ((*p).to_owned(), true)).collect();
        run_cycle(
            at(110),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            60,
            &mut suffix,
        );
        assert_eq!(status["b"].last_seen_at, at(110));
        assert_eq!(
            status["b"].pod_status.keys().cloned().collect::<Vec<_>>(),
            original_pod
        );

        // b comes back within the grace period: same pod, no new spawn.
        spec.insert("b".to_owned(), true);
        let (_, _, spawns) = run_cycle(
            at(140),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            60,
            &mut suffix,
        );
        assert!(spawns.is_empty());
        assert!(is_never_seen(&status["b"].last_seen_at));
        assert_eq!(
            status["b"].pod_status.keys().cloned().collect::<Vec<_>>(),
            original_pod
        );
    }

    #[test]
    fn expired_client_frees_its_pod_for_gc() {
        let mut spec = connected(&["a"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2)];
        let mut suffix = suffixes();
        run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            30,
            &mut suffix,
        );

        spec.insert("a".to_owned(), false);
        let cluster = ["s-t-0001"];
        let observed: BTreeMap<String, bool> =
            cluster.iter().map(|p| ((*p).to_owned(), true)).collect();
        run_cycle(
            at(110),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            30,
            &mut suffix,
        );

        // Past the timeout the client drops out of the status and the pod
        // lands in the reutilization pool, eligible for a registration.
        let (alloc, reutilize, _) = run_cycle(
            at(141),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            30,
            &mut suffix,
        );
        assert!(status.get("a").is_none());
        assert!(reutilize["t"].contains("s-t-0001"));

        let (create, delete) =
            registration_changes(&alloc, &reutilize, &BTreeSet::new());
        assert_eq!(create, vec!["s-t-0001".to_owned()]);
        assert!(delete.is_empty());
    }

    #[test]
    fn zero_timeout_expires_on_the_next_cycle() {
        let now = at(100);
        assert!(client_has_expired(&now, &at(100), 0));
        assert!(client_has_expired(&now, &at(70), 30));
        assert!(!client_has_expired(&now, &at(71), 30));
        assert!(!client_has_expired(&now, &NEVER_SEEN, 0));
    }

    #[test]
    fn new_client_reuses_the_smallest_idle_pod() {
        let spec = connected(&["a"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2)];
        // Two idle pods are warm in the cluster; the lexicographically
        // smallest one is drawn first, and nothing is spawned.
        let cluster = ["s-t-bbbb", "s-t-aaaa"];
        let observed: BTreeMap<String, bool> =
            cluster.iter().map(|p| ((*p).to_owned(), true)).collect();
        let (alloc, reutilize, spawns) = run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            30,
            &mut suffixes(),
        );

        assert!(spawns.is_empty());
        assert_eq!(alloc.entries[0].pods[0].name, "s-t-aaaa");
        assert!(status["a"].pod_status.contains_key("s-t-aaaa"));
        // The leftover idle pod still needs a registration.
        let (create, _) = registration_changes(&alloc, &reutilize, &BTreeSet::new());
        assert_eq!(create, vec!["s-t-bbbb".to_owned()]);
    }

    #[test]
    fn fill_first_picks_the_pod_with_fewest_clients() {
        // a sits alone on 0002; b and c share 0001. The new client lands on
        // 0002, the pod with the fewest clients that still has capacity.
        let spec = connected(&["a", "b", "c", "d"]);
        let mut status: BTreeMap<String, ClientStatus> = BTreeMap::new();
        let bind = |pod: &str| {
            let mut pod_status = BTreeMap::new();
            pod_status.insert(
                pod.to_owned(),
                PodStatus {
                    paths: vec![format!("/{}/http", pod)],
                    ready: true,
                },
            );
            ClientStatus::connected(pod_status)
        };
        status.insert("a".to_owned(), bind("s-t-0002"));
        status.insert("b".to_owned(), bind("s-t-0001"));
        status.insert("c".to_owned(), bind("s-t-0001"));

        let templates = vec![template("t", 3)];
        let cluster = ["s-t-0001", "s-t-0002"];
        let observed: BTreeMap<String, bool> =
            cluster.iter().map(|p| ((*p).to_owned(), true)).collect();
        let (alloc, _, spawns) = run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            30,
            &mut suffixes(),
        );

        assert!(spawns.is_empty());
        let with_d = alloc.entries[0]
            .pods
            .iter()
            .find(|pod| pod.clients.iter().any(|c| c.id == "d"))
            .unwrap();
        assert_eq!(with_d.name, "s-t-0002");
    }

    #[test]
    fn equal_occupancy_breaks_ties_by_suffix() {
        let spec = connected(&["a", "b", "c"]);
        let mut status: BTreeMap<String, ClientStatus> = BTreeMap::new();
        let bind = |pod: &str| {
            let mut pod_status = BTreeMap::new();
            pod_status.insert(
                pod.to_owned(),
                PodStatus {
                    paths: vec![],
                    ready: true,
                },
            );
            ClientStatus::connected(pod_status)
        };
        status.insert("a".to_owned(), bind("s-t-zz00"));
        status.insert("b".to_owned(), bind("s-t-aa00"));

        let templates = vec![template("t", 2)];
        let cluster = ["s-t-zz00", "s-t-aa00"];
        let observed: BTreeMap<String, bool> =
            cluster.iter().map(|p| ((*p).to_owned(), true)).collect();
        let (alloc, _, _) = run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            30,
            &mut suffixes(),
        );

        let with_c = alloc.entries[0]
            .pods
            .iter()
            .find(|pod| pod.clients.iter().any(|client| client.id == "c"))
            .unwrap();
        assert_eq!(with_c.name, "s-t-aa00");
    }

    #[test]
    fn registrations_track_idleness_both_ways() {
        let mut spec = connected(&["a"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2)];
        let mut suffix = suffixes();
        run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            300,
            &mut suffix,
        );

        // a disconnects (grace period still running): its pod has zero
        // connected clients and needs a registration.
        spec.insert("a".to_owned(), false);
        let cluster = ["s-t-0001"];
        let observed: BTreeMap<String, bool> =
            cluster.iter().map(|p| ((*p).to_owned(), true)).collect();
        let (alloc, reutilize, _) = run_cycle(
            at(110),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            300,
            &mut suffix,
        );
        let (create, delete) = registration_changes(&alloc, &reutilize, &BTreeSet::new());
        assert_eq!(create, vec!["s-t-0001".to_owned()]);
        assert!(delete.is_empty());

        // a reconnects: the registration must be retracted.
        spec.insert("a".to_owned(), true);
        let (alloc, reutilize, _) = run_cycle(
            at(120),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            300,
            &mut suffix,
        );
        let existing: BTreeSet<String> = vec!["s-t-0001".to_owned()].into_iter().collect();
        let (create, delete) = registration_changes(&alloc, &reutilize, &existing);
        assert!(create.is_empty());
        assert_eq!(delete, vec!["s-t-0001".to_owned()]);
    }

    #[test]
    fn pod_readiness_propagates_into_client_readiness() {
        let spec = connected(&["a"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2), template("u", 2)];
        let mut suffix = suffixes();
        run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            30,
            &mut suffix,
        );
        assert!(!status["a"].ready);

        // Only one of the two pods is ready: the client stays not ready.
        let cluster = ["s-t-0001", "s-u-0002"];
        let mut observed: BTreeMap<String, bool> = BTreeMap::new();
        observed.insert("s-t-0001".to_owned(), true);
        observed.insert("s-u-0002".to_owned(), false);
        run_cycle(
            at(110),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            30,
            &mut suffix,
        );
        assert!(status["a"].pod_status["s-t-0001"].ready);
        assert!(!status["a"].pod_status["s-u-0002"].ready);
        assert!(!status["a"].ready);

        // Both ready: exactly the affected client's top-level flag flips.
        observed.insert("s-u-0002".to_owned(), true);
        run_cycle(
            at(120),
            &spec,
            &mut status,
            &templates,
            &cluster,
            &observed,
            30,
            &mut suffix,
        );
        assert!(status["a"].ready);
    }

    #[test]
    fn departed_clients_are_dropped_from_status() {
        let spec = connected(&["a", "b"]);
        let mut status = BTreeMap::new();
        let templates = vec![template("t", 2)];
        let mut suffix = suffixes();
        run_cycle(
            at(100),
            &spec,
            &mut status,
            &templates,
            &[],
            &BTreeMap::new(),
            30,
            &mut suffix,
        );

        let spec = connected(&["a"]);
        run_cycle(
            at(110),
            &spec,
            &mut status,
            &templates,
            &["s-t-0001"],
            &BTreeMap::new(),
            30,
            &mut suffix,
        );
        assert!(status.contains_key("a"));
        assert!(!status.contains_key("b"));
    }

    #[test]
    fn malformed_pod_names_are_skipped() {
        let mapping = template_pod_mapping(vec!["s-t-0001", "short", "s-u"].into_iter());
        assert_eq!(mapping.len(), 1);
        assert!(mapping["t"].contains("s-t-0001"));
    }
}
