use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use homeprice::predictor::Predictor;
use homeprice::server::{self, AppCli};
use homeprice::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let config = AppCli::parse().build_config();

    let app = match Predictor::load(&config.artifact) {
        Ok(predictor) => {
            info!(
                model = %predictor.artifact().model_name,
                path = %config.artifact.display(),
                "pipeline loaded"
            );
            server::router(Arc::new(predictor))
        }
        Err(err) if config.serve_error_page => {
            error!(error = %err, "pipeline unavailable; serving error page");
            server::error_router(err.to_string())
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("cannot start without a usable pipeline at {}", config.artifact.display())
            })
        }
    };

    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind))?;
    println!("predictor_app listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}
