//! Manifest rendering for dry runs

use crate::error::Result;
use crate::k8s::{create_deployment, create_service, Workload};

/// Render the Deployment and Service as one multi-document YAML stream
pub fn render_manifests(workload: &Workload) -> Result<String> {
    let deployment = serde_yaml::to_string(&create_deployment(workload))?;
    let service = serde_yaml::to_string(&create_service(workload))?;
    Ok(format!("{}---\n{}", deployment, service))
}
