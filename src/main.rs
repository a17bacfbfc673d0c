//! spiffe-inject webhook server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spiffe_inject::config::InjectorConfig;
use spiffe_inject::webhook::{webhook_router, WebhookState};

/// Mutating admission webhook injecting SPIFFE workload identity into pods
#[derive(Parser, Debug)]
#[command(name = "spiffe-inject", version, about, long_about = None)]
struct Cli {
    /// Address to bind the webhook server
    #[arg(long, default_value = "0.0.0.0:8443")]
    addr: SocketAddr,

    /// Path to the TLS certificate (PEM)
    #[arg(long, env = "SPIFFE_INJECT_TLS_CERT")]
    tls_cert: PathBuf,

    /// Path to the TLS private key (PEM)
    #[arg(long, env = "SPIFFE_INJECT_TLS_KEY")]
    tls_key: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install the process-wide crypto provider before anything touches TLS.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install crypto provider: {e:?}");
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = InjectorConfig::from_env();
    info!(
        helper_image = %config.helper_image,
        init_image = %config.init_image,
        proxy_image = %config.proxy_image,
        "injector configuration loaded"
    );

    let state = Arc::new(WebhookState::new(config));
    let app = webhook_router(state);

    let tls_config = RustlsConfig::from_pem_file(&cli.tls_cert, &cli.tls_key)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS cert/key: {e}"))?;

    info!(addr = %cli.addr, "starting admission webhook server");

    axum_server::bind_rustls(cli.addr, tls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}
