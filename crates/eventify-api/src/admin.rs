use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use eventify_db::{RecentEventRow, RecentTicketRow};
use eventify_types::api::{Activity, ActivityKind, DashboardStats, EventStats, UpdateUserRequest};
use eventify_types::models::{Event, ScanLog, User};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::middleware::Principal;
use crate::policy::{Operation, authorize};
use crate::state::AppState;

const RECENT_PER_KIND: u32 = 5;
const ACTIVITY_FEED_LEN: usize = 8;

#[derive(Serialize)]
pub struct UserListResponse {
    message: &'static str,
    users: Vec<User>,
}

#[derive(Serialize)]
pub struct UserResponse {
    message: &'static str,
    user: User,
}

#[derive(Serialize)]
pub struct AdminEventsResponse {
    message: &'static str,
    events: Vec<Event>,
}

#[derive(Serialize)]
pub struct ActivitiesResponse {
    message: &'static str,
    activities: Vec<Activity>,
}

#[derive(Serialize)]
pub struct DashboardResponse {
    message: &'static str,
    #[serde(flatten)]
    stats: DashboardStats,
}

#[derive(Serialize)]
pub struct EventStatsResponse {
    message: &'static str,
    stats: Vec<EventStats>,
}

#[derive(Serialize)]
pub struct ScanLogResponse {
    message: &'static str,
    logs: Vec<ScanLog>,
}

#[derive(Debug, Deserialize)]
pub struct ScanLogQuery {
    #[serde(default = "default_log_limit")]
    pub limit: u32,
}

fn default_log_limit() -> u32 {
    100
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<UserListResponse>> {
    authorize(Operation::Administer, &principal)?;

    let rows = state.db(|db| db.list_users()).await?;
    Ok(Json(UserListResponse {
        message: "All users fetched successfully",
        users: rows.into_iter().map(User::from).collect(),
    }))
}

/// Change a user's role or blocked flag. Admins cannot edit their own
/// account here.
pub async fn update_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> ApiResult<Json<UserResponse>> {
    authorize(Operation::Administer, &principal)?;

    if req.role.is_none() && req.is_blocked.is_none() {
        return Err(ApiError::validation("Nothing to update"));
    }
    if user_id == principal.id {
        return Err(ApiError::validation("You cannot change your own account"));
    }

    let (role, blocked) = (req.role, req.is_blocked);
    let row = state
        .db(move |db| db.update_user(user_id, role, blocked))
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    info!(
        "Admin {} updated user {} (role={}, blocked={})",
        principal.username, row.id, row.role, row.is_blocked
    );

    Ok(Json(UserResponse {
        message: "User updated",
        user: User::from(row),
    }))
}

/// Tickets and events the user owned stay behind as history.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(Operation::Administer, &principal)?;

    if user_id == principal.id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }
    if !state.db(move |db| db.delete_user(user_id)).await? {
        return Err(ApiError::not_found("User"));
    }

    info!("Admin {} deleted user {}", principal.username, user_id);
    Ok(Json(serde_json::json!({ "message": "User deleted successfully" })))
}

pub async fn list_events(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<AdminEventsResponse>> {
    authorize(Operation::Administer, &principal)?;

    let rows = state.db(|db| db.list_events()).await?;
    Ok(Json(AdminEventsResponse {
        message: "All events fetched successfully",
        events: rows.into_iter().map(Event::from).collect(),
    }))
}

pub async fn activities(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<ActivitiesResponse>> {
    authorize(Operation::Administer, &principal)?;

    let (tickets, events) = state
        .db(|db| {
            Ok((
                db.recent_tickets(RECENT_PER_KIND)?,
                db.recent_events(RECENT_PER_KIND)?,
            ))
        })
        .await?;

    Ok(Json(ActivitiesResponse {
        message: "Recent activities fetched",
        activities: merge_activities(tickets, events),
    }))
}

/// Newest first across both kinds, capped to the feed length.
fn merge_activities(tickets: Vec<RecentTicketRow>, events: Vec<RecentEventRow>) -> Vec<Activity> {
    let mut feed: Vec<Activity> = tickets
        .into_iter()
        .map(|t| Activity {
            kind: ActivityKind::Ticket,
            message: format!(
                "{} booked {} ticket(s) for {}.",
                t.username.as_deref().unwrap_or("Someone"),
                t.quantity,
                t.event_title.as_deref().unwrap_or("an event")
            ),
            time: t.created_at,
        })
        .chain(events.into_iter().map(|e| Activity {
            kind: ActivityKind::Event,
            message: format!(
                "New event \"{}\" was created by {}.",
                e.title,
                e.host_username.as_deref().unwrap_or("a host")
            ),
            time: e.created_at,
        }))
        .collect();

    feed.sort_by(|a, b| b.time.cmp(&a.time));
    feed.truncate(ACTIVITY_FEED_LEN);
    feed
}

pub async fn dashboard_stats(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<DashboardResponse>> {
    authorize(Operation::Administer, &principal)?;

    let totals = state.db(|db| db.platform_totals()).await?;
    Ok(Json(DashboardResponse {
        message: "Dashboard stats fetched successfully",
        stats: DashboardStats {
            total_users: totals.users,
            total_events: totals.events,
            total_tickets: totals.tickets,
            total_revenue: totals.revenue,
        },
    }))
}

pub async fn event_stats(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<EventStatsResponse>> {
    authorize(Operation::Administer, &principal)?;

    let rows = state.db(|db| db.event_stats(None)).await?;
    Ok(Json(EventStatsResponse {
        message: "Event stats fetched",
        stats: rows.into_iter().map(EventStats::from).collect(),
    }))
}

pub async fn scan_logs(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ScanLogQuery>,
) -> ApiResult<Json<ScanLogResponse>> {
    authorize(Operation::Administer, &principal)?;

    let limit = query.limit.clamp(1, 500);
    let rows = state.db(move |db| db.list_scan_logs(limit)).await?;
    Ok(Json(ScanLogResponse {
        message: "Scan logs fetched",
        logs: rows.into_iter().map(ScanLog::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use eventify_types::models::Role;
    use serde_json::json;

    use super::*;
    use crate::lifecycle::{self, IssueRequest};
    use crate::test_support::{TestApp, json_request};

    #[test]
    fn activity_feed_is_newest_first_and_capped() {
        let now = Utc::now();
        let tickets = (0..5)
            .map(|i| RecentTicketRow {
                username: Some("asha".to_string()),
                event_title: None,
                quantity: 2,
                created_at: now - Duration::minutes(i * 2),
            })
            .collect();
        let events = (0..5)
            .map(|i| RecentEventRow {
                title: format!("Show {}", i),
                host_username: None,
                created_at: now - Duration::minutes(i * 2 + 1),
            })
            .collect();

        let feed = merge_activities(tickets, events);
        assert_eq!(feed.len(), ACTIVITY_FEED_LEN);
        assert!(feed.windows(2).all(|w| w[0].time >= w[1].time));
        assert_eq!(feed[0].message, "asha booked 2 ticket(s) for an event.");
        assert_eq!(feed[1].message, "New event \"Show 0\" was created by a host.");
    }

    #[tokio::test]
    async fn dashboard_reflects_sales_and_scans() {
        let app = TestApp::new();
        let admin = app.user(Role::Admin);
        let host = app.user(Role::Host);
        let fan = app.user(Role::User);
        let event = app.event(host.id, 0);

        let (ticket, _) = lifecycle::issue_ticket(
            &app.state,
            IssueRequest { event_id: event, user_id: fan.id, quantity: 3, payment_ref: None },
        )
        .await
        .unwrap();
        lifecycle::scan_ticket(&app.state, &ticket.id.to_string(), &host).await.unwrap();

        let token = app.token(&admin);
        let (status, stats) = app.get("/api/admin/stats", Some(&token)).await;
        assert_eq!(status, 200);
        assert_eq!(stats["totalUsers"], 3);
        assert_eq!(stats["totalTickets"], 1);
        assert_eq!(stats["totalRevenue"], 300.0);

        let (_, per_event) = app.get("/api/admin/event-stats", Some(&token)).await;
        assert_eq!(per_event["stats"][0]["ticketsSold"], 3);
        assert_eq!(per_event["stats"][0]["ticketsScanned"], 1);

        let (_, logs) = app.get("/api/admin/scan-logs?limit=10", Some(&token)).await;
        assert_eq!(logs["logs"][0]["scannedByUsername"], host.username.as_str());

        let (_, feed) = app.get("/api/admin/activities", Some(&token)).await;
        assert_eq!(feed["activities"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn blocking_a_user_locks_them_out() {
        let app = TestApp::new();
        let admin = app.user(Role::Admin);
        let fan = app.user(Role::User);
        let fan_token = app.token(&fan);

        let (status, body) = app
            .call(json_request(
                "PUT",
                &format!("/api/admin/users/{}", fan.id),
                Some(&app.token(&admin)),
                json!({ "isBlocked": true }),
            ))
            .await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body["user"]["isBlocked"], true);

        let (status, _) = app.get("/api/auth/profile", Some(&fan_token)).await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn admin_routes_are_admin_only() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let (status, _) = app.get("/api/admin/users", Some(&app.token(&host))).await;
        assert_eq!(status, 403);

        let admin = app.user(Role::Admin);
        let (status, _) = app
            .call(json_request(
                "DELETE",
                &format!("/api/admin/users/{}", admin.id),
                Some(&app.token(&admin)),
                json!({}),
            ))
            .await;
        assert_eq!(status, 400);
    }
}
