use crate::decoder::AdmissionDecoder;
use crate::rewriter::ImageRewriter;
use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod annotations;
mod config;
mod decoder;
mod ignore_policy;
mod image_reference;
mod rewriter;
mod webhook;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("Starting kuik-webhook {}", env!("CARGO_PKG_VERSION"));

    let config_path =
        env::var("CONFIG_PATH").unwrap_or_else(|_| "/etc/kuik/config.yaml".to_string());
    let config = config::load_config(&config_path)?;

    let mut rewriter = ImageRewriter::new(config.rewrite_config()?);
    rewriter.inject_decoder(AdmissionDecoder::new())?;

    let app = webhook::create_app(Arc::new(rewriter));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.webserver.port));

    match &config.webserver.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to load TLS certificate {} and key {}",
                        tls.cert_path.display(),
                        tls.key_path.display()
                    )
                })?;
            info!("Starting webhook server with TLS on {}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("Starting webhook server without TLS on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
