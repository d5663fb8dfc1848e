//! Error types and failure classification

use thiserror::Error;

use crate::k8s::Step;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read kubeconfig {path}: {source}")]
    Kubeconfig {
        path: String,
        #[source]
        source: kube::config::KubeconfigError,
    },

    #[error("failed to infer cluster configuration: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    #[error("failed to build Kubernetes client: {0}")]
    Client(#[source] kube::Error),

    #[error("{step} failed ({class}): {source}")]
    Step {
        step: Step,
        class: ErrorClass,
        #[source]
        source: kube::Error,
    },

    #[error("service {0} has no selector, refusing to list every pod in the namespace")]
    MissingSelector(String),

    #[error("operator prompt failed: {0}")]
    Prompt(#[from] std::io::Error),

    #[error("failed to render manifest: {0}")]
    Render(#[from] serde_yaml::Error),
}

impl Error {
    pub fn step(step: Step, source: kube::Error) -> Self {
        Error::Step {
            step,
            class: classify(&source),
            source,
        }
    }

    /// The step that failed, if the error came from a cluster call
    pub fn failed_step(&self) -> Option<Step> {
        match self {
            Error::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Whether a failed call is worth repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Throttling, timeouts, server-side unavailability and transport failures
/// are transient; any other API answer is final.
pub fn classify(err: &kube::Error) -> ErrorClass {
    match err {
        kube::Error::Api(resp) => match resp.code {
            408 | 429 | 500 | 502 | 503 | 504 => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        },
        kube::Error::HyperError(_) | kube::Error::Service(_) => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

/// True when the API server answered 404 for the object
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// True when the API server answered 409 AlreadyExists
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("simulated {reason}"),
        reason: reason.to_string(),
        code,
    })
}
