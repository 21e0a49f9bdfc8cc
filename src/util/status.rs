use sha2::{Digest, Sha256};
use telepresence_types::{Session, SessionStatus};

use super::{Error, STATUS_HASH_ANNOTATION};

/// Hashes the serialized status. Status maps are ordered, so two logically
/// identical statuses always serialize to the same bytes.
pub fn hash_status(status: &SessionStatus) -> Result<String, Error> {
    let bytes = serde_json::to_vec(status)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Returns the hash recorded by the previous status write, if any.
pub fn recorded_hash(session: &Session) -> Option<String> {
    session
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(STATUS_HASH_ANNOTATION))
        .cloned()
}

pub fn set_hash_annotation(session: &mut Session, hash: &str) {
    session
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(STATUS_HASH_ANNOTATION.to_owned(), hash.to_owned());
}

pub fn status_has_changed(old_hash: Option<&str>, new_hash: &str) -> bool {
    old_hash != Some(new_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use telepresence_types::{ClientStatus, PodStatus};

    fn status_with_client(id: &str, ready: bool) -> SessionStatus {
        let mut clients = BTreeMap::new();
        let mut pod_status = BTreeMap::new();
        pod_status.insert(
            "s-t-0000".to_owned(),
            PodStatus {
                paths: vec!["/s-t-0000/http".to_owned()],
                ready,
            },
        );
        let mut client = ClientStatus::connected(pod_status);
        client.ready = ready;
        clients.insert(id.to_owned(), client);
        SessionStatus {
            clients,
            ..Default::default()
        }
    }

    #[test]
    fn identical_statuses_hash_identically() {
        let a = hash_status(&status_with_client("alice", false)).unwrap();
        let b = hash_status(&status_with_client("alice", false)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn readiness_flip_changes_the_hash() {
        let a = hash_status(&status_with_client("alice", false)).unwrap();
        let b = hash_status(&status_with_client("alice", true)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unchanged_hash_suppresses_the_write() {
        let hash = hash_status(&status_with_client("alice", false)).unwrap();
        assert!(!status_has_changed(Some(&hash), &hash));
        assert!(status_has_changed(None, &hash));
        assert!(status_has_changed(Some("stale"), &hash));
    }

    #[test]
    fn annotation_round_trip() {
        let mut session = Session::default();
        assert_eq!(recorded_hash(&session), None);
        set_hash_annotation(&mut session, "abc123");
        assert_eq!(recorded_hash(&session).as_deref(), Some("abc123"));
    }
}
