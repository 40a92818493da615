//! Operational HTTP surface: liveness, last-cycle status, manual cycle
//! trigger, and read-only uptime reporting.

use std::sync::Arc;

use actix_web::{HttpResponse, Responder, get, post, web};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use crate::database::Store;
use crate::database::models::from_unix;
use crate::monitoring::scheduler::CycleReport;
use crate::reporting;

/// Shared state handed to the HTTP workers.
pub struct OpsState {
    pub status: watch::Receiver<Option<CycleReport>>,
    pub trigger: mpsc::Sender<()>,
    pub store: Arc<dyn Store>,
}

/// Health check route
/// This route returns no content, the response status is enough.
#[get("/health")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}

/// Last cycle report. `null` until the first cycle has finished, so
/// external health checks can observe both staleness and absence.
#[get("/status")]
pub async fn status_route(state: web::Data<OpsState>) -> impl Responder {
    HttpResponse::Ok().json(state.status.borrow().clone())
}

/// Queue one manual monitoring cycle.
#[post("/cycle")]
pub async fn trigger_route(state: web::Data<OpsState>) -> impl Responder {
    match state.trigger.try_send(()) {
        Ok(()) => HttpResponse::Accepted().json(json!({ "queued": true })),
        // Channel full: a cycle is in flight and one is already queued.
        Err(_) => HttpResponse::Conflict().json(json!({ "queued": false })),
    }
}

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    /// Range start, unix seconds.
    pub from: i64,
    /// Range end, unix seconds.
    pub to: i64,
}

/// Uptime percentage for one equipment over [from, to), reconstructed
/// from the availability ledger.
#[get("/equipment/{id}/uptime")]
pub async fn uptime_route(
    path: web::Path<String>,
    query: web::Query<UptimeQuery>,
    state: web::Data<OpsState>,
) -> actix_web::Result<HttpResponse> {
    let id = path.into_inner();
    let from = from_unix(query.from);
    let to = from_unix(query.to);

    let equipment = state
        .store
        .equipment(&id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    if equipment.is_none() {
        return Ok(HttpResponse::NotFound().json(json!({ "error": "unknown equipment" })));
    }

    let records = state
        .store
        .intervals_overlapping(&id, from, to)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let uptime = reporting::uptime_percentage(&records, from, to);
    Ok(HttpResponse::Ok().json(json!({
        "equipment_id": id,
        "from": query.from,
        "to": query.to,
        "uptime_percent": uptime,
    })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_route).service(status_route).service(trigger_route).service(uptime_route);
}
