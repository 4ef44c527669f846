//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use saga::{LedgerService, MessageBus};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ledger: &'static str,
    pub bus: &'static str,
}

/// GET /health — `ok` while the ledger is connected and the bus is open,
/// `degraded` with a 503 otherwise.
pub async fn check<L, B>(State(state): State<Arc<AppState<L, B>>>) -> (StatusCode, Json<HealthResponse>)
where
    L: LedgerService,
    B: MessageBus,
{
    let ledger_up = state.ledger.is_connected();
    let bus_open = !state.bus.is_closed();

    let response = HealthResponse {
        status: if ledger_up && bus_open { "ok" } else { "degraded" },
        ledger: if ledger_up { "connected" } else { "disconnected" },
        bus: if bus_open { "open" } else { "closed" },
    };
    let code = if ledger_up && bus_open {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(response))
}
