use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use kube_lifecycle::{
    config::{Config, LogFormat},
    k8s::{K8sClient, Lifecycle, Workload},
    prompt::{NoPause, StdinPrompt},
    render::render_manifests,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before tracing so the output format is known
    let config = Config::load().context("failed to load configuration")?;

    init_tracing(config.log_format);

    tracing::info!(
        namespace = %config.namespace,
        job_id = %config.job_id,
        image = %config.image,
        "Configuration loaded"
    );

    if config.dry_run {
        print!("{}", render_manifests(&Workload::from(&config))?);
        return Ok(());
    }

    // No client, no run
    let k8s = K8sClient::connect(&config)
        .await
        .context("failed to create Kubernetes client")?;
    k8s.health_check()
        .await
        .context("Kubernetes cluster is not reachable")?;

    let report = if config.interactive {
        Lifecycle::from_config(&k8s, StdinPrompt::new(), &config)
            .run()
            .await?
    } else {
        Lifecycle::from_config(&k8s, NoPause, &config).run().await?
    };

    match config.log_format {
        LogFormat::Json => println!("{}", serde_json::to_string(&report)?),
        LogFormat::Pretty => println!("{}", report),
    }

    Ok(())
}

/// Logs go to stderr so stdout carries only the prompt, manifests and report
fn init_tracing(format: LogFormat) {
    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(fmt_layer)
        .init();
}
