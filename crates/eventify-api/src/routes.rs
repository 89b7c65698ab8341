use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{admin, auth, events, payments, stats, tickets};

/// Every JSON route, mounted under `/api`. Public routes stay outside the
/// auth layer; the webhook authenticates by signature instead of a token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/events", get(events::list_events))
        .route("/events/{id}", get(events::get_event))
        .route("/events/host/{host_id}", get(events::list_events_by_host))
        .route("/payment/webhook", post(payments::handle_webhook));

    let protected_routes = Router::new()
        .route("/auth/profile", get(auth::profile))
        // Events
        .route(
            "/events",
            post(events::create_event).layer(DefaultBodyLimit::max(events::MAX_FORM_BYTES)),
        )
        .route(
            "/events/{id}",
            put(events::update_event)
                .delete(events::delete_event)
                .layer(DefaultBodyLimit::max(events::MAX_FORM_BYTES)),
        )
        // Tickets
        .route("/tickets/purchase", post(tickets::purchase))
        .route("/tickets/my-tickets", get(tickets::my_tickets))
        .route("/tickets/admin/all", get(tickets::all_tickets))
        .route("/tickets/scan", post(tickets::scan))
        .route(
            "/tickets/{id}",
            get(tickets::get_ticket)
                .put(tickets::update_ticket)
                .delete(tickets::delete_ticket),
        )
        .route("/scan", post(tickets::scan))
        // Payments
        .route("/payment/create-intent", post(payments::create_intent))
        .route("/payment/confirm", post(payments::confirm_payment))
        .route(
            "/payment/create-checkout-session",
            post(payments::create_checkout_session),
        )
        .route("/payment/confirm-checkout", post(payments::confirm_checkout))
        // Admin
        .route("/admin/users", get(admin::list_users))
        .route(
            "/admin/users/{id}",
            put(admin::update_user).delete(admin::delete_user),
        )
        .route("/admin/events", get(admin::list_events))
        .route("/admin/activities", get(admin::activities))
        .route("/admin/stats", get(admin::dashboard_stats))
        .route("/admin/event-stats", get(admin::event_stats))
        .route("/admin/scan-logs", get(admin::scan_logs))
        // Stats
        .route("/stats", get(stats::event_stats))
        .route("/stats/host", get(stats::host_dashboard))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .with_state(state)
}
