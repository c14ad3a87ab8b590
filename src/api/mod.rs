use crate::{
    admission::admission_middleware,
    api::handlers::{auth, authorize, health, keys},
    state::GatewayState,
    sweep::Sweeper,
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

pub mod extract;
pub mod handlers;
mod openapi;

pub use self::openapi::openapi;

/// Build the application router. Every route sits behind the admission
/// middleware.
#[must_use]
pub fn router(state: GatewayState) -> Router {
    let body_limit = usize::try_from(state.config.max_request_bytes()).unwrap_or(usize::MAX);
    let pipeline = state.pipeline.clone();

    Router::new()
        .route("/health", get(health::health))
        .route("/openapi.json", get(|| async { Json(openapi()) }))
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/refresh", post(auth::refresh))
        .route("/v1/auth/logout", post(auth::logout))
        .route("/v1/auth/csrf", get(auth::csrf_token))
        .route("/v1/keys", post(keys::create).get(keys::list))
        .route("/v1/keys/:id", delete(keys::revoke))
        .route(
            "/v1/authorize/:resource/:action",
            get(authorize::authorize),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(pipeline, admission_middleware))
        .with_state(state)
}

/// Serve the API until SIGINT/SIGTERM, sweeping expired state in the
/// background.
/// # Errors
/// Returns an error if the server fails to start
pub async fn new(port: u16, state: GatewayState) -> Result<()> {
    let sweeper = {
        let state = state.clone();
        Sweeper::spawn(state.config.sweep_interval(), move || {
            let state = state.clone();
            async move { state.sweep().await }
        })
    };
    let grace = state.config.sweep_grace();

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Gracefully shutdown");
    sweeper.shutdown(grace).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, request_id)
}
