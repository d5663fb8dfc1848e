use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Prefix of every environment variable read by [`Config::load`]
pub const ENV_PREFIX: &str = "KUBE_LIFECYCLE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: Option<String>,

    #[serde(default)]
    pub context: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_job_id")]
    pub job_id: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_container_port")]
    pub container_port: u16,

    #[serde(default = "default_service_port")]
    pub service_port: u16,

    #[serde(default = "default_target_port")]
    pub target_port: u16,

    #[serde(default = "default_interactive")]
    pub interactive: bool,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub delete_propagation: DeletePropagation,

    #[serde(default)]
    pub log_format: LogFormat,
}

/// How dependents of a deleted object are cleaned up
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeletePropagation {
    #[default]
    Background,
    Foreground,
    Orphan,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_kubeconfig() -> Option<String> {
    None
}

fn default_namespace() -> String {
    "yeda-test".to_string()
}

fn default_job_id() -> String {
    "test".to_string()
}

fn default_image() -> String {
    "yeda:v1".to_string()
}

fn default_container_port() -> u16 {
    80
}

fn default_service_port() -> u16 {
    80
}

fn default_target_port() -> u16 {
    32730
}

fn default_interactive() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Config {
    /// Load settings from `KUBE_LIFECYCLE_*` environment variables and `.env`
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let settings: Config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the API server would refuse anyway, before connecting
    pub fn validate(&self) -> Result<()> {
        if !is_dns_label(&self.namespace) {
            return Err(Error::InvalidConfig(format!(
                "namespace '{}' is not a valid DNS-1123 label",
                self.namespace
            )));
        }
        // Longest derived name is "<job_id>-deployment". Service names are
        // DNS-1035 labels, so the job id must also start with a letter.
        let starts_with_letter = self
            .job_id
            .bytes()
            .next()
            .map_or(false, |b| b.is_ascii_lowercase());
        if !starts_with_letter || !is_dns_label(&format!("{}-deployment", self.job_id)) {
            return Err(Error::InvalidConfig(format!(
                "job id '{}' does not produce valid resource names",
                self.job_id
            )));
        }
        if self.image.trim().is_empty() {
            return Err(Error::InvalidConfig("image must not be empty".to_string()));
        }
        if self.container_port == 0 || self.service_port == 0 || self.target_port == 0 {
            return Err(Error::InvalidConfig("ports must be in 1..=65535".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: default_kubeconfig(),
            context: None,
            namespace: default_namespace(),
            job_id: default_job_id(),
            image: default_image(),
            container_port: default_container_port(),
            service_port: default_service_port(),
            target_port: default_target_port(),
            interactive: default_interactive(),
            dry_run: false,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            delete_propagation: DeletePropagation::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// RFC 1123 label: lowercase alphanumerics and '-', at most 63 chars,
/// starting and ending with an alphanumeric
fn is_dns_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes.first() != Some(&b'-')
        && bytes.last() != Some(&b'-')
}
