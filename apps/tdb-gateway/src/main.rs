use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

mod access_log;
mod admin;
mod api;
mod app_state;
mod bootstrap;
pub mod config;
mod gateway;
mod request_ctx;
mod responses;
mod router;
mod security;
#[cfg(test)]
mod test_support;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    tdb_otel::init();

    let cfg = match config::GatewayConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let state = match AppState::open(&cfg, Arc::new(tdb_token::SystemClock)) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    };
    if cfg.admin_token.is_none() {
        info!(target: "tdb::admin", "TDB_ADMIN_TOKEN not set; admin routes disabled");
    }

    let app = bootstrap::build_app(state, cfg.concurrency_limit);

    let listener = match tokio::net::TcpListener::bind(cfg.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("error: failed to bind {}: {err}", cfg.addr);
            std::process::exit(1);
        }
    };
    info!(addr = %cfg.addr, "tenantdb gateway listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }
    info!("gateway stopped");
}

async fn shutdown_signal() {
    info!("shutdown signal listener active");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
