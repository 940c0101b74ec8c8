use std::{io, net::SocketAddr};

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, get_service, post},
    Extension, Router,
};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{config::Config, control, error::Error, manager::ConnectionManager, websocket};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 3123;

fn router(config: &Config, manager: ConnectionManager) -> Router {
    let mut app = Router::new()
        .route("/open", post(control::open))
        .route("/close", post(control::close))
        .route("/write", post(control::write))
        .route("/state", get(control::state))
        .route("/serial/devices", get(control::devices))
        .route("/ws", get(websocket::ws_handler))
        .route("/config", get(show_config))
        .route("/version", get(show_version));

    // Registered routes take precedence over the fallback.
    match &config.static_dir {
        Some(dir) if dir.is_dir() => {
            info!(?dir, "Serving static files");

            app = app.fallback(get_service(ServeDir::new(dir)).handle_error(
                |e: io::Error| async move {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Unhandled internal error: {e}"),
                    )
                },
            ));
        }
        Some(dir) => warn!(?dir, "Static directory does not exist, not serving it"),
        None => {}
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            // Every handler operates on the same connection
            .layer(Extension(manager))
            // The config should be known to the web server
            .layer(Extension(config.clone())),
    )
}

async fn run(
    config: Config,
    manager: ConnectionManager,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    config.validate()?;

    let app = router(&config, manager);

    let addr = SocketAddr::new(config.listen_ip()?, port.unwrap_or(0));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::InternalIssue(format!("Could not bind to {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody wanted to know which port was allocated");
        }
    }

    info!("listening on {}", addr);

    server
        .await
        .map_err(|e| Error::InternalIssue(format!("Server failed: {e}")))
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(
    config: Config,
    manager: ConnectionManager,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error> {
    run(config, manager, None, Some(allocated_port)).await
}

/// Start the server on the given port.
pub async fn run_on_port(
    config: Config,
    manager: ConnectionManager,
    port: u16,
) -> Result<(), Error> {
    run(config, manager, Some(port), None).await
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    config.serialize_pretty()
}

async fn show_version() -> impl IntoResponse {
    format!("Serial Relay v{}\n", env!("CARGO_PKG_VERSION"))
}
