//! kube-lifecycle library
//!
//! Creates a Deployment and a Service, lists the pods behind the Service and
//! tears both down again, pausing for the operator between steps.

pub mod config;
pub mod error;
pub mod k8s;
pub mod prompt;
pub mod render;

pub use error::{Error, Result};
