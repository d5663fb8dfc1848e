//! Kubernetes resource builders
//!
//! Functions to create the Deployment and Service descriptors for a workload,
//! and to turn a selector map back into a list query.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::config::Config;

/// Label key shared by the pod template and the service selector
pub const APP_LABEL: &str = "app";

/// Value of the `app` label carried by the Service object itself
pub const SERVICE_OWNER_LABEL: &str = "controller";

/// Keep-alive command for the container; the image does no work of its own
pub const CONTAINER_COMMAND: [&str; 3] = ["/bin/bash", "-c", "--"];
pub const CONTAINER_ARGS: [&str; 1] = ["while true; do sleep 30; done;"];

/// Everything the builders need to know about one workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub job_id: String,
    pub namespace: String,
    pub image: String,
    pub container_port: i32,
    pub service_port: i32,
    pub target_port: i32,
}

impl Workload {
    pub fn deployment_name(&self) -> String {
        format!("{}-deployment", self.job_id)
    }

    pub fn service_name(&self) -> String {
        format!("{}-service", self.job_id)
    }

    pub fn container_name(&self) -> String {
        format!("{}-container", self.job_id)
    }
}

impl From<&Config> for Workload {
    fn from(config: &Config) -> Self {
        Self {
            job_id: config.job_id.clone(),
            namespace: config.namespace.clone(),
            image: config.image.clone(),
            container_port: i32::from(config.container_port),
            service_port: i32::from(config.service_port),
            target_port: i32::from(config.target_port),
        }
    }
}

/// Labels that tie the pods to both the Deployment and the Service
pub fn workload_labels(job_id: &str) -> BTreeMap<String, String> {
    [(APP_LABEL.to_string(), job_id.to_string())]
        .into_iter()
        .collect()
}

/// Create the single-replica Deployment for a workload
pub fn create_deployment(workload: &Workload) -> Deployment {
    let labels = workload_labels(&workload.job_id);

    let container = Container {
        name: workload.container_name(),
        image: Some(workload.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            protocol: Some("TCP".to_string()),
            container_port: workload.container_port,
            ..Default::default()
        }]),
        command: Some(CONTAINER_COMMAND.iter().map(|s| s.to_string()).collect()),
        args: Some(CONTAINER_ARGS.iter().map(|s| s.to_string()).collect()),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(workload.deployment_name()),
            namespace: Some(workload.namespace.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create the Service fronting the workload's pods.
///
/// The cluster IP is left empty so the API server allocates one.
pub fn create_service(workload: &Workload) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(workload.service_name()),
            namespace: Some(workload.namespace.clone()),
            labels: Some(
                [(APP_LABEL.to_string(), SERVICE_OWNER_LABEL.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port: workload.service_port,
                target_port: Some(IntOrString::Int(workload.target_port)),
                ..Default::default()
            }]),
            selector: Some(workload_labels(&workload.job_id)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Render an equality selector map in the `k1=v1,k2=v2` form accepted by
/// list calls. Keys come out sorted because the map is ordered.
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector of a Service as returned by the API server, if it has one
pub fn service_selector(service: &Service) -> Option<&BTreeMap<String, String>> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .filter(|selector| !selector.is_empty())
}

/// Check an object's labels against an equality selector
pub fn labels_match(
    labels: Option<&BTreeMap<String, String>>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.and_then(|l| l.get(key)) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_workload() -> Workload {
        Workload::from(&Config::default())
    }

    #[test]
    fn test_workload_names() {
        let workload = create_test_workload();
        assert_eq!(workload.deployment_name(), "test-deployment");
        assert_eq!(workload.service_name(), "test-service");
        assert_eq!(workload.container_name(), "test-container");
    }

    #[test]
    fn test_create_deployment() {
        let workload = create_test_workload();
        let deployment = create_deployment(&workload);

        assert_eq!(deployment.metadata.name, Some("test-deployment".to_string()));
        assert_eq!(deployment.metadata.namespace, Some("yeda-test".to_string()));

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.selector.match_labels, Some(workload_labels("test")));
        assert_eq!(
            spec.template.metadata.unwrap().labels,
            Some(workload_labels("test"))
        );

        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(pod_spec.containers.len(), 1);
        let container = &pod_spec.containers[0];
        assert_eq!(container.name, "test-container");
        assert_eq!(container.image, Some("yeda:v1".to_string()));
        assert_eq!(
            container.command,
            Some(vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                "--".to_string()
            ])
        );
        assert_eq!(
            container.args,
            Some(vec!["while true; do sleep 30; done;".to_string()])
        );

        let ports = container.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name, Some("http".to_string()));
        assert_eq!(ports[0].protocol, Some("TCP".to_string()));
        assert_eq!(ports[0].container_port, 80);
    }

    #[test]
    fn test_create_service() {
        let workload = create_test_workload();
        let service = create_service(&workload);

        assert_eq!(service.metadata.name, Some("test-service".to_string()));
        assert_eq!(service.metadata.namespace, Some("yeda-test".to_string()));
        assert_eq!(
            service.metadata.labels.as_ref().unwrap().get("app"),
            Some(&"controller".to_string())
        );

        let spec = service.spec.unwrap();
        assert_eq!(spec.cluster_ip, None);
        assert_eq!(spec.selector, Some(workload_labels("test")));

        let ports = spec.ports.unwrap();
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(32730)));
    }

    #[test]
    fn test_selector_string_sorted() {
        let selector: BTreeMap<String, String> = [
            ("tier".to_string(), "web".to_string()),
            ("app".to_string(), "test".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(selector_string(&selector), "app=test,tier=web");
        assert_eq!(selector_string(&BTreeMap::new()), "");
    }

    #[test]
    fn test_service_selector_ignores_empty_map() {
        let workload = create_test_workload();
        let mut service = create_service(&workload);
        assert_eq!(service_selector(&service), Some(&workload_labels("test")));

        service.spec.as_mut().unwrap().selector = Some(BTreeMap::new());
        assert_eq!(service_selector(&service), None);

        service.spec = None;
        assert_eq!(service_selector(&service), None);
    }

    #[test]
    fn test_labels_match() {
        let selector = workload_labels("test");
        let matching = workload_labels("test");
        let other = workload_labels("other");

        assert!(labels_match(Some(&matching), &selector));
        assert!(!labels_match(Some(&other), &selector));
        assert!(!labels_match(None, &selector));
    }
}
