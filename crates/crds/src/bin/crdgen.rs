//! Prints every Harbor operator CRD as a multi-document YAML stream.

use crds::cluster::{v1alpha3, v1beta1};
use crds::{
    ChartMuseum, Core, Exporter, HarborServerConfiguration, JobService, NotaryServer, NotarySigner, Portal,
    PullSecretBinding, Registry, RegistryController, Trivy,
};
use kube::CustomResourceExt;
use kube::core::crd::merge_crds;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = merge_crds(
        vec![v1alpha3::HarborCluster::crd(), v1beta1::HarborCluster::crd()],
        crds::HUB_VERSION,
    )?;

    let crds = vec![
        cluster,
        Core::crd(),
        JobService::crd(),
        Registry::crd(),
        RegistryController::crd(),
        Portal::crd(),
        ChartMuseum::crd(),
        Trivy::crd(),
        NotaryServer::crd(),
        NotarySigner::crd(),
        Exporter::crd(),
        HarborServerConfiguration::crd(),
        PullSecretBinding::crd(),
    ];

    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
