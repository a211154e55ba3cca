//! upload-gate server binary.
//!
//! A small web front-end that authenticates users against an LDAP directory,
//! hands out a short-lived session cookie, and accepts single-file uploads
//! into a server-local directory. The main entry point loads the TOML
//! configuration, builds the Axum router, and starts an HTTP or HTTPS listener.

mod config;
mod directory;
mod error;
mod http;
mod logging;
mod pages;
mod routes;
mod session;
mod tls;
mod upload;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

use crate::config::{Args, Config, SHUTDOWN_GRACE_SECS};
use crate::http::request_span;
use crate::routes::{LoginMode, build_router};
use crate::upload::UploadTarget;

shadow!(build);

/// Starts the upload-gate server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let config = Config::load(&args.conf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    info!(path = ?args.conf, "loaded config");

    let uploads = Arc::new(UploadTarget::new(config.upload.path.clone()));
    uploads.ensure_root().await?;
    info!(path = ?uploads.root_path(), "upload directory ready");
    let login_mode = Arc::new(LoginMode::from_config(&config.ldap));
    if matches!(login_mode.as_ref(), LoginMode::Open) {
        info!("directory authentication disabled, sessions are issued on first visit");
    }

    let app = build_router(login_mode, uploads).layer(
        TraceLayer::new_for_http()
            .make_span_with(request_span::<axum::body::Body>)
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, config.listen.port);
    let handle = Handle::new();
    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    if config.listen.ssl {
        let tls_config = tls::build_rustls_config(&config.listen, host).await?;
        info!("listening on {} with SSL", addr);
        let server = axum_server::bind_rustls(addr, tls_config)
            .handle(handle.clone())
            .serve(service);
        tokio::select! {
            result = server => result?,
            _ = shutdown_signal(handle, "https", addr) => {}
        }
    } else {
        info!("listening on {} without SSL", addr);
        let server = axum_server::bind(addr).handle(handle.clone()).serve(service);
        tokio::select! {
            result = server => result?,
            _ = shutdown_signal(handle, "http", addr) => {}
        }
    }

    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM，然后让在途上传在宽限期内完成。
async fn shutdown_signal(handle: Handle, scheme: &'static str, addr: SocketAddr) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        %scheme,
        %addr,
        grace_secs = SHUTDOWN_GRACE_SECS,
        "stopping listener, waiting for in-flight requests"
    );
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
