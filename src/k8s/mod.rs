//! Kubernetes integration module
//!
//! This module handles all interactions with the cluster:
//! - Building the Deployment and Service descriptors
//! - Creating, listing and deleting objects through a namespaced client
//! - Running the create, inspect and teardown sequence

mod client;
mod lifecycle;
mod resources;

pub use client::{delete_params, ClusterApi, K8sClient};
pub use lifecycle::{Lifecycle, LifecycleReport, PodEntry, RetryPolicy, Step};
pub use resources::{
    create_deployment, create_service, labels_match, selector_string, service_selector,
    workload_labels, Workload, APP_LABEL, SERVICE_OWNER_LABEL,
};
