//! Listener wiring: public, internal, and metrics surfaces.

use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::state::AppState;

pub struct EdgeServer {
    state: AppState,
}

impl EdgeServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Bind and serve all three listeners until `shutdown` fires.
    /// In-flight request handlers are allowed to complete.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let public = api::public::router(self.state.clone());
        let internal = api::internal::router(self.state.clone());
        let metrics = api::metrics_surface::router();

        let cfg = &self.state.config;
        tokio::try_join!(
            serve("public", public, cfg.public_addr(), shutdown.clone()),
            serve("internal", internal, cfg.internal_addr(), shutdown.clone()),
            serve("metrics", metrics, cfg.metrics_addr(), shutdown.clone()),
        )?;
        Ok(())
    }
}

async fn serve(
    surface: &'static str,
    app: Router,
    addr: std::net::SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(surface, %addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
