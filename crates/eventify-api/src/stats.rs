use axum::{Extension, Json, extract::State};
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use eventify_types::api::{EventStats, HostDashboard};
use eventify_types::models::{Event, Role};

use crate::error::ApiResult;
use crate::middleware::Principal;
use crate::policy::{Operation, authorize};
use crate::state::AppState;

const UPCOMING_EVENTS: u32 = 5;

#[derive(Serialize)]
pub struct StatsResponse {
    stats: Vec<EventStats>,
}

/// Sold and scanned counts per event: a host sees their own events, an
/// admin sees every event.
pub async fn event_stats(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<StatsResponse>> {
    authorize(Operation::ViewEventStats, &principal)?;

    let scope = (principal.role != Role::Admin).then_some(principal.id);
    let rows = state.db(move |db| db.event_stats(scope)).await?;

    Ok(Json(StatsResponse {
        stats: rows.into_iter().map(EventStats::from).collect(),
    }))
}

pub async fn host_dashboard(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<HostDashboard>> {
    authorize(Operation::ViewHostDashboard, &principal)?;

    let host_id = principal.id;
    let (totals, upcoming) = state
        .db(move |db| {
            Ok((
                db.host_totals(host_id)?,
                db.upcoming_events_by_host(host_id, Utc::now(), UPCOMING_EVENTS)?,
            ))
        })
        .await?;

    debug!("Host dashboard for {}: {} events", host_id, totals.events);

    Ok(Json(HostDashboard {
        total_events: totals.events,
        total_tickets: totals.tickets,
        total_revenue: totals.revenue,
        avg_revenue_per_event: average(totals.revenue, totals.events),
        upcoming_events: upcoming.into_iter().map(Event::from).collect(),
    }))
}

fn average(total: f64, count: i64) -> f64 {
    if count > 0 { total / count as f64 } else { 0.0 }
}
