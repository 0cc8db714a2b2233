//! Liveness endpoint for hosting platforms that expect an HTTP port.

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub const LIVENESS_TEXT: &str = "Bot is running!";

pub(crate) fn router() -> Router {
    Router::new().route("/", get(liveness))
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

/// Serves the liveness router until `shutdown` changes.
///
/// # Errors
/// Returns an error if the listener fails while serving.
pub(crate) async fn serve(listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "liveness endpoint listening");

    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            shutdown.changed().await.ok();
        })
        .await
        .context("liveness endpoint failed")?;

    info!("liveness endpoint stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn root_reports_liveness_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, shutdown_rx));

        let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), LIVENESS_TEXT);

        let missing = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        shutdown_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
