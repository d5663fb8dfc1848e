//! Lifecycle runner
//!
//! Drives one workload through create, inspect and teardown. Anything this run
//! created is deleted again when a later step fails.

use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::client::{delete_params, ClusterApi};
use super::resources::{
    create_deployment, create_service, labels_match, selector_string, service_selector, Workload,
};
use crate::config::Config;
use crate::error::{classify, is_conflict, is_not_found, Error, ErrorClass, Result};
use crate::prompt::Pause;

/// The five steps of a run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[strum(serialize = "connect")]
    Connect,
    #[strum(serialize = "create deployment")]
    CreateDeployment,
    #[strum(serialize = "create service")]
    CreateService,
    #[strum(serialize = "list pods")]
    ListPods,
    #[strum(serialize = "teardown")]
    Teardown,
}

/// Bounded retry for transient failures, fixed delay between attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub async fn run<T, F, Fut>(&self, step: Step, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = kube::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if classify(&e) == ErrorClass::Transient && attempt < self.max_attempts => {
                    warn!(%step, attempt, error = %e, "Transient failure, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::step(step, e)),
            }
        }
    }

    /// Retry loop for creates. A transient failure may have reached the
    /// server, so `may_exist` is raised and a later 409 means an earlier
    /// attempt stored the object: `Ok(None)` tells the caller to fetch it.
    pub async fn run_create<T, F, Fut>(
        &self,
        step: Step,
        may_exist: &mut bool,
        mut create: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = kube::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match create().await {
                Ok(value) => return Ok(Some(value)),
                Err(e) if *may_exist && is_conflict(&e) => {
                    warn!(%step, "Object was stored by an earlier attempt");
                    return Ok(None);
                }
                Err(e) if classify(&e) == ErrorClass::Transient => {
                    *may_exist = true;
                    if attempt >= self.max_attempts {
                        return Err(Error::step(step, e));
                    }
                    warn!(%step, attempt, error = %e, "Transient failure, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::step(step, e)),
            }
        }
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self::new(config.max_attempts, config.retry_delay())
    }
}

/// One pod as seen by the list step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodEntry {
    pub name: String,
    pub ip: Option<String>,
    pub phase: Option<String>,
}

impl From<&Pod> for PodEntry {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            ip: status.and_then(|s| s.pod_ip.clone()),
            phase: status.and_then(|s| s.phase.clone()),
        }
    }
}

/// What a run observed
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleReport {
    pub namespace: String,
    pub deployment_name: String,
    pub deployment_uid: Option<String>,
    pub deployment_created: bool,
    pub service_name: String,
    pub cluster_ip: Option<String>,
    pub service_created: bool,
    pub selector: Option<String>,
    pub pods: Vec<PodEntry>,
    pub torn_down: bool,
}

impl LifecycleReport {
    fn new(workload: &Workload) -> Self {
        Self {
            namespace: workload.namespace.clone(),
            deployment_name: workload.deployment_name(),
            service_name: workload.service_name(),
            ..Default::default()
        }
    }
}

impl fmt::Display for LifecycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "namespace: {}", self.namespace)?;
        writeln!(
            f,
            "deployment {} uid {}",
            self.deployment_name,
            self.deployment_uid.as_deref().unwrap_or("<none>")
        )?;
        writeln!(
            f,
            "service {} cluster IP {}",
            self.service_name,
            self.cluster_ip.as_deref().unwrap_or("<pending>")
        )?;
        for pod in &self.pods {
            writeln!(
                f,
                "pod {} ip {} phase {}",
                pod.name,
                pod.ip.as_deref().unwrap_or("<none>"),
                pod.phase.as_deref().unwrap_or("Unknown")
            )?;
        }
        if self.torn_down {
            write!(f, "deleted deployment and service")
        } else {
            write!(f, "resources left in place")
        }
    }
}

/// Runs the create, inspect and teardown sequence against a cluster
pub struct Lifecycle<'a, C: ?Sized, P> {
    cluster: &'a C,
    pause: P,
    workload: Workload,
    retry: RetryPolicy,
    delete_params: DeleteParams,
}

impl<'a, C, P> Lifecycle<'a, C, P>
where
    C: ClusterApi + ?Sized,
    P: Pause,
{
    pub fn new(cluster: &'a C, pause: P, workload: Workload) -> Self {
        Self {
            cluster,
            pause,
            workload,
            retry: RetryPolicy::once(),
            delete_params: DeleteParams::background(),
        }
    }

    /// Runner with workload, retry and deletion settings taken from config
    pub fn from_config(cluster: &'a C, pause: P, config: &Config) -> Self {
        Self::new(cluster, pause, Workload::from(config))
            .with_retry(RetryPolicy::from(config))
            .with_delete_params(delete_params(config.delete_propagation))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_delete_params(mut self, params: DeleteParams) -> Self {
        self.delete_params = params;
        self
    }

    /// Run every step. The client already exists, so the connect step only
    /// waits for the operator.
    #[instrument(skip(self), fields(namespace = %self.workload.namespace, job_id = %self.workload.job_id))]
    pub async fn run(&mut self) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::new(&self.workload);

        info!(step = %Step::Connect, "Client ready");
        self.pause.pause().await?;

        if let Err(err) = self.create_and_inspect(&mut report).await {
            if report.deployment_created || report.service_created {
                warn!(error = %err, "Run failed, removing created resources");
                self.cleanup_after_failure(&report).await;
            }
            return Err(err);
        }

        self.teardown(&mut report).await?;
        Ok(report)
    }

    async fn create_and_inspect(&mut self, report: &mut LifecycleReport) -> Result<()> {
        self.create_deployment(report).await?;
        self.inspect(report).await
    }

    /// `report.deployment_created` is raised as soon as the object may exist,
    /// even when the step then fails, so cleanup still removes it.
    async fn create_deployment(&mut self, report: &mut LifecycleReport) -> Result<()> {
        let deployment = create_deployment(&self.workload);
        let cluster = self.cluster;
        let name = report.deployment_name.clone();

        let outcome = self
            .retry
            .run_create(Step::CreateDeployment, &mut report.deployment_created, || {
                cluster.create_deployment(&deployment)
            })
            .await?;
        report.deployment_created = true;

        let created = match outcome {
            Some(created) => created,
            None => {
                self.retry
                    .run(Step::CreateDeployment, || cluster.get_deployment(&name))
                    .await?
            }
        };

        report.deployment_uid = created.metadata.uid;
        info!(
            name = %report.deployment_name,
            uid = report.deployment_uid.as_deref().unwrap_or("<none>"),
            "Deployment created"
        );
        Ok(())
    }

    async fn inspect(&mut self, report: &mut LifecycleReport) -> Result<()> {
        self.pause.pause().await?;

        let service = create_service(&self.workload);
        let cluster = self.cluster;
        let name = report.service_name.clone();

        let outcome = self
            .retry
            .run_create(Step::CreateService, &mut report.service_created, || {
                cluster.create_service(&service)
            })
            .await?;
        report.service_created = true;

        let created = match outcome {
            Some(created) => created,
            None => {
                self.retry
                    .run(Step::CreateService, || cluster.get_service(&name))
                    .await?
            }
        };
        report.cluster_ip = created
            .spec
            .as_ref()
            .and_then(|spec| spec.cluster_ip.clone())
            .filter(|ip| !ip.is_empty());
        info!(
            name = %report.service_name,
            cluster_ip = report.cluster_ip.as_deref().unwrap_or("<pending>"),
            "Service created"
        );

        self.pause.pause().await?;

        // Select on what the server stored, not on what was sent
        let selector_map = service_selector(&created)
            .cloned()
            .ok_or_else(|| Error::MissingSelector(report.service_name.clone()))?;
        let selector = selector_string(&selector_map);
        let pods = self
            .retry
            .run(Step::ListPods, || cluster.list_pods(&selector))
            .await?;

        report.pods = pods
            .iter()
            .filter(|pod| {
                let matches = labels_match(pod.metadata.labels.as_ref(), &selector_map);
                if !matches {
                    warn!(
                        pod = pod.metadata.name.as_deref().unwrap_or("unknown"),
                        "Dropping pod that does not match the service selector"
                    );
                }
                matches
            })
            .map(PodEntry::from)
            .collect();
        for pod in &report.pods {
            info!(
                pod = %pod.name,
                ip = pod.ip.as_deref().unwrap_or("<none>"),
                "Matched pod"
            );
        }
        report.selector = Some(selector);

        self.pause.pause().await?;
        Ok(())
    }

    /// Delete both resources. The service is attempted even when the
    /// deployment deletion fails; the first error wins.
    #[instrument(skip_all)]
    async fn teardown(&mut self, report: &mut LifecycleReport) -> Result<()> {
        let deployment = self.delete_deployment(&report.deployment_name).await;
        let service = self.delete_service(&report.service_name).await;
        deployment?;
        service?;

        report.torn_down = true;
        info!("Deleted deployment and service");
        Ok(())
    }

    async fn cleanup_after_failure(&self, report: &LifecycleReport) {
        if report.service_created {
            if let Err(e) = self.delete_service(&report.service_name).await {
                warn!(error = %e, name = %report.service_name, "Failed to remove service");
            }
        }
        if report.deployment_created {
            if let Err(e) = self.delete_deployment(&report.deployment_name).await {
                warn!(error = %e, name = %report.deployment_name, "Failed to remove deployment");
            }
        }
    }

    async fn delete_deployment(&self, name: &str) -> Result<()> {
        let cluster = self.cluster;
        let params = &self.delete_params;
        self.retry
            .run(Step::Teardown, move || async move {
                ignore_not_found(cluster.delete_deployment(name, params).await, name)
            })
            .await
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        let cluster = self.cluster;
        let params = &self.delete_params;
        self.retry
            .run(Step::Teardown, move || async move {
                ignore_not_found(cluster.delete_service(name, params).await, name)
            })
            .await
    }
}

/// A 404 on delete means the object is already gone
fn ignore_not_found(result: kube::Result<()>, name: &str) -> kube::Result<()> {
    match result {
        Err(e) if is_not_found(&e) => {
            warn!(name, "Already deleted");
            Ok(())
        }
        other => other,
    }
}
