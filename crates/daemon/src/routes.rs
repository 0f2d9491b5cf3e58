use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use ctx_common::{
    Deregistration, Heartbeat, LeaseStatus, QueryRequest, Registration, RegistrationReply,
    WireMessage,
};
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::discoverer::{Discoverer, DiscoveryError};
use crate::leases::LeaseError;

pub const WIRE_CONTENT_TYPE: &str = "application/xml";

pub fn router(discoverer: Arc<Discoverer>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/deregister", post(deregister))
        .route("/query", post(query))
        .route("/leases", get(list_leases))
        .layer(CorsLayer::permissive())
        .with_state(discoverer)
}

fn decode<M: WireMessage>(body: &str) -> Result<M, StatusCode> {
    M::from_wire(body).map_err(|e| {
        warn!("Rejected <{}> message: {}", M::ROOT, e);
        StatusCode::BAD_REQUEST
    })
}

fn reply<M: WireMessage>(message: &M) -> Result<Response, StatusCode> {
    match message.to_wire() {
        Ok(body) => Ok(([(header::CONTENT_TYPE, WIRE_CONTENT_TYPE)], body).into_response()),
        Err(e) => {
            error!("Failed to encode <{}> reply: {}", M::ROOT, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn status_for(e: &DiscoveryError) -> StatusCode {
    match e {
        DiscoveryError::Directory(_) => StatusCode::CONFLICT,
        DiscoveryError::Lease(LeaseError::AlreadyRegistered(_)) => StatusCode::CONFLICT,
        DiscoveryError::Lease(LeaseError::NotFound(_)) => StatusCode::NOT_FOUND,
        DiscoveryError::UnknownComponent(_) => StatusCode::NOT_FOUND,
    }
}

async fn register(
    State(discoverer): State<Arc<Discoverer>>,
    body: String,
) -> Result<Response, StatusCode> {
    let registration: Registration = decode(&body)?;
    match discoverer.register(registration) {
        Ok(lease) => reply(&RegistrationReply { lease }),
        Err(e) => {
            warn!("Registration refused: {}", e);
            Err(status_for(&e))
        }
    }
}

async fn heartbeat(
    State(discoverer): State<Arc<Discoverer>>,
    body: String,
) -> Result<StatusCode, StatusCode> {
    let heartbeat: Heartbeat = decode(&body)?;
    discoverer
        .heartbeat(heartbeat)
        .map(|_| StatusCode::OK)
        .map_err(|e| status_for(&e))
}

async fn deregister(
    State(discoverer): State<Arc<Discoverer>>,
    body: String,
) -> Result<StatusCode, StatusCode> {
    let deregistration: Deregistration = decode(&body)?;
    discoverer
        .deregister(deregistration.component_index)
        .map(|_| StatusCode::OK)
        .map_err(|e| status_for(&e))
}

async fn query(
    State(discoverer): State<Arc<Discoverer>>,
    body: String,
) -> Result<Response, StatusCode> {
    let request: QueryRequest = decode(&body)?;
    reply(&discoverer.query(&request.query))
}

async fn list_leases(State(discoverer): State<Arc<Discoverer>>) -> Json<Vec<LeaseStatus>> {
    Json(discoverer.lease_statuses())
}
