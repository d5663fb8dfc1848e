//! Kubernetes client wrapper

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client,
};
use tracing::{info, instrument};

use crate::config::{Config, DeletePropagation};
use crate::error::{Error, Result};

/// The cluster calls the lifecycle needs, scoped to one namespace
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_deployment(&self, deployment: &Deployment) -> kube::Result<Deployment>;

    async fn get_deployment(&self, name: &str) -> kube::Result<Deployment>;

    async fn create_service(&self, service: &Service) -> kube::Result<Service>;

    async fn get_service(&self, name: &str) -> kube::Result<Service>;

    async fn list_pods(&self, label_selector: &str) -> kube::Result<Vec<Pod>>;

    async fn delete_deployment(&self, name: &str, params: &DeleteParams) -> kube::Result<()>;

    async fn delete_service(&self, name: &str, params: &DeleteParams) -> kube::Result<()>;
}

/// Delete parameters carrying the configured propagation policy
pub fn delete_params(propagation: DeletePropagation) -> DeleteParams {
    match propagation {
        DeletePropagation::Background => DeleteParams::background(),
        DeletePropagation::Foreground => DeleteParams::foreground(),
        DeletePropagation::Orphan => DeleteParams::orphan(),
    }
}

/// Wrapper around kube::Client bound to a namespace
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    namespace: String,
}

impl K8sClient {
    /// Build a client from the configured kubeconfig, or infer one when no
    /// path is set. Fails instead of handing out an unusable client.
    #[instrument(skip_all, fields(namespace = %config.namespace))]
    pub async fn connect(config: &Config) -> Result<Self> {
        let options = KubeConfigOptions {
            context: config.context.clone(),
            ..Default::default()
        };

        let kube_config = match &config.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|source| Error::Kubeconfig {
                    path: path.clone(),
                    source,
                })?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|source| Error::Kubeconfig {
                        path: path.clone(),
                        source,
                    })?
            }
            None if options.context.is_some() => kube::Config::from_kubeconfig(&options)
                .await
                .map_err(|source| Error::Kubeconfig {
                    path: "<default>".to_string(),
                    source,
                })?,
            None => kube::Config::infer().await?,
        };

        let cluster_url = kube_config.cluster_url.clone();
        let client = Client::try_from(kube_config).map_err(Error::Client)?;

        info!(%cluster_url, "Created Kubernetes client");

        Ok(Self {
            client,
            namespace: config.namespace.clone(),
        })
    }

    /// Check if cluster is reachable
    pub async fn health_check(&self) -> Result<String> {
        let version = self.client.apiserver_version().await.map_err(Error::Client)?;
        info!(version = %version.git_version, "Kubernetes cluster is reachable");
        Ok(version.git_version)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ClusterApi for K8sClient {
    #[instrument(skip(self, deployment), fields(name = %deployment.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_deployment(&self, deployment: &Deployment) -> kube::Result<Deployment> {
        let created = self
            .deployments()
            .create(&PostParams::default(), deployment)
            .await?;
        info!("Created deployment");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_deployment(&self, name: &str) -> kube::Result<Deployment> {
        self.deployments().get(name).await
    }

    #[instrument(skip(self, service), fields(name = %service.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_service(&self, service: &Service) -> kube::Result<Service> {
        let created = self
            .services()
            .create(&PostParams::default(), service)
            .await?;
        info!("Created service");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_service(&self, name: &str) -> kube::Result<Service> {
        self.services().get(name).await
    }

    #[instrument(skip(self))]
    async fn list_pods(&self, label_selector: &str) -> kube::Result<Vec<Pod>> {
        let list = self
            .pods()
            .list(&ListParams::default().labels(label_selector))
            .await?;
        info!(count = list.items.len(), "Listed pods");
        Ok(list.items)
    }

    #[instrument(skip(self, params))]
    async fn delete_deployment(&self, name: &str, params: &DeleteParams) -> kube::Result<()> {
        self.deployments().delete(name, params).await?;
        info!("Deleted deployment");
        Ok(())
    }

    #[instrument(skip(self, params))]
    async fn delete_service(&self, name: &str, params: &DeleteParams) -> kube::Result<()> {
        self.services().delete(name, params).await?;
        info!("Deleted service");
        Ok(())
    }
}
