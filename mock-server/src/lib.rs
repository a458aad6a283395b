//! Stand-in for the 3scale metering backend.
//!
//! Serves the authorize, oauth_authorize, authrep and report endpoints with
//! the backend's XML bodies and status codes, against the fixture in
//! `backend::Fixture`. Counters live in memory for the life of the router.

pub mod backend;
pub mod xml;

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use tokio::net::TcpListener;
use tracing::debug;

pub use backend::{Application, Backend, Fixture, Limit, Mode, Recorded};

const CONTENT_TYPE_XML: &str = "application/vnd.3scale-v2.0+xml";

type Params = Vec<(String, String)>;

/// Router over a fresh backend with the default fixture.
pub fn app() -> Router {
    app_with(Arc::new(Backend::default()))
}

/// Router over a caller-owned backend, so tests can inspect its state.
pub fn app_with(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/transactions/authorize.xml", get(authorize))
        .route("/transactions/oauth_authorize.xml", get(oauth_authorize))
        .route("/transactions/authrep.xml", get(authrep))
        .route("/transactions.xml", post(report))
        .with_state(backend)
}

pub async fn run_with(listener: TcpListener, backend: Arc<Backend>) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(backend)).await
}

async fn authorize(State(backend): State<Arc<Backend>>, Query(params): Query<Params>) -> Response {
    debug!("authorize");
    xml_response(backend.transact(&params, Mode::Authorize).await)
}

async fn oauth_authorize(
    State(backend): State<Arc<Backend>>,
    Query(params): Query<Params>,
) -> Response {
    debug!("oauth_authorize");
    xml_response(backend.transact(&params, Mode::OAuthAuthorize).await)
}

async fn authrep(State(backend): State<Arc<Backend>>, Query(params): Query<Params>) -> Response {
    debug!("authrep");
    xml_response(backend.transact(&params, Mode::Authrep).await)
}

async fn report(State(backend): State<Arc<Backend>>, Form(params): Form<Params>) -> Response {
    debug!(params = params.len(), "report");
    xml_response(backend.report(&params).await)
}

fn xml_response((status, body): backend::Reply) -> Response {
    if body.is_empty() {
        return status.into_response();
    }
    (status, [(header::CONTENT_TYPE, CONTENT_TYPE_XML)], body).into_response()
}
