use kube::CustomResourceExt;
use std::fs;
use telepresence_types::*;

fn main() {
    fs::create_dir_all("crds").unwrap();
    fs::write(
        "crds/telepresence.dev_session_crd.yaml",
        serde_yaml::to_string(&Session::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "crds/telepresence.dev_gcregistration_crd.yaml",
        serde_yaml::to_string(&GCRegistration::crd()).unwrap(),
    )
    .unwrap();
}
