use std::{net::SocketAddr, thread};

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serves the build output directory on a background thread.
pub fn start(dir: Utf8PathBuf, port: u16) -> thread::JoinHandle<Result<(), anyhow::Error>> {
    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|rt| rt.block_on(serve(dir, port)));

        if let Err(e) = &result {
            tracing::error!("HTTP server stopped: {e}");
        }

        result
    })
}

async fn serve(dir: Utf8PathBuf, port: u16) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address).await?;

    let router = Router::new()
        // the configured server root of the build output
        .fallback_service(ServeDir::new(dir));

    axum::serve(address, router).await?;

    Ok(())
}
