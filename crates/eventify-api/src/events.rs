use axum::{
    Extension, Json,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use eventify_db::{EventPatch, NewEvent};
use eventify_types::api::{EventFields, EventListResponse, EventResponse};
use eventify_types::models::Event;

use crate::error::{ApiError, ApiResult};
use crate::media::{MAX_BANNER_BYTES, StoredAsset};
use crate::middleware::Principal;
use crate::policy::{Operation, authorize, require_owner_or_admin};
use crate::state::{AppState, AppStateInner};

/// Multipart field carrying the banner image.
const BANNER_FIELD: &str = "banner";

/// Body limit for event writes: a full-size banner plus the text fields.
pub const MAX_FORM_BYTES: usize = MAX_BANNER_BYTES + 64 * 1024;

pub struct BannerUpload {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// Event fields submitted either as `multipart/form-data` (text fields plus
/// an optional `banner` file) or as a JSON body.
pub struct EventForm {
    pub fields: EventFields,
    pub banner: Option<BannerUpload>,
}

impl<S> FromRequest<S> for EventForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Json(fields) = Json::<EventFields>::from_request(req, state).await?;
            return Ok(Self { fields, banner: None });
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::Validation(e.body_text()))?;

        let mut fields = EventFields::default();
        let mut banner = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == BANNER_FIELD {
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(e.body_text()))?;
                if data.len() > MAX_BANNER_BYTES {
                    return Err(ApiError::validation("Banner image is too large"));
                }
                if !data.is_empty() {
                    banner = Some(BannerUpload { data, content_type });
                }
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| ApiError::Validation(e.body_text()))?;
            apply_text_field(&mut fields, &name, value.trim())?;
        }

        Ok(Self { fields, banner })
    }
}

fn apply_text_field(fields: &mut EventFields, name: &str, value: &str) -> ApiResult<()> {
    let text = || Some(value.to_string());
    match name {
        "title" => fields.title = text(),
        "description" => fields.description = text(),
        "venue" => fields.venue = text(),
        "location" => fields.location = text(),
        "category" => fields.category = text(),
        "dateTime" if !value.is_empty() => {
            fields.date_time = Some(
                parse_date_time(value)
                    .ok_or_else(|| ApiError::validation("Invalid date/time"))?,
            );
        }
        "price" if !value.is_empty() => {
            fields.price = Some(
                value
                    .parse()
                    .map_err(|_| ApiError::validation("Price must be a number"))?,
            );
        }
        "ticketLimit" if !value.is_empty() => {
            fields.ticket_limit = Some(
                value
                    .parse()
                    .map_err(|_| ApiError::validation("Ticket limit must be a whole number"))?,
            );
        }
        "coordinates" if !value.is_empty() => {
            fields.coordinates = Some(
                parse_coordinates(value)
                    .ok_or_else(|| ApiError::validation("Invalid coordinates"))?,
            );
        }
        _ => {}
    }
    Ok(())
}

/// RFC 3339, or the zone-less `YYYY-MM-DDTHH:MM[:SS]` an HTML datetime
/// input produces (read as UTC).
fn parse_date_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|ndt| ndt.and_utc())
}

/// A JSON array (`[73.85, 18.52]`) or a comma-separated pair.
fn parse_coordinates(raw: &str) -> Option<Vec<f64>> {
    if raw.starts_with('[') {
        return serde_json::from_str(raw).ok();
    }
    raw.split(',')
        .map(|part| part.trim().parse::<f64>().ok())
        .collect()
}

fn validate(fields: &EventFields) -> ApiResult<()> {
    if fields.price.is_some_and(|p| !p.is_finite() || p < 0.0) {
        return Err(ApiError::validation("Price cannot be negative"));
    }
    if fields.ticket_limit.is_some_and(|l| l < 0) {
        return Err(ApiError::validation("Ticket limit cannot be negative"));
    }
    if let Some(coords) = &fields.coordinates {
        if !(coords.is_empty() || coords.len() == 2) {
            return Err(ApiError::validation("Coordinates must be [longitude, latitude]"));
        }
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Release an asset that is no longer referenced. Failure only leaves an
/// orphan file behind, so it is logged and swallowed.
async fn release_asset(state: &AppStateInner, asset_id: &str) {
    if asset_id.is_empty() {
        return;
    }
    if let Err(e) = state.media.delete(asset_id).await {
        warn!("Failed to delete banner {}: {:#}", asset_id, e);
    }
}

async fn store_banner(state: &AppStateInner, banner: BannerUpload) -> ApiResult<StoredAsset> {
    Ok(state
        .media
        .store(banner.data, banner.content_type.as_deref())
        .await?)
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    form: EventForm,
) -> ApiResult<impl IntoResponse> {
    authorize(Operation::ManageEvents, &principal)?;

    let fields = form.fields;
    validate(&fields)?;
    let (Some(title), Some(date_time), Some(location)) = (
        non_empty(fields.title),
        fields.date_time,
        non_empty(fields.location),
    ) else {
        return Err(ApiError::validation(
            "Title, date/time, and location are required",
        ));
    };

    let asset = match form.banner {
        Some(banner) => Some(store_banner(&state, banner).await?),
        None => None,
    };
    let (banner, banner_id) = asset
        .map(|a| (a.url, a.id))
        .unwrap_or_default();

    let new_event = NewEvent {
        id: Uuid::new_v4(),
        title,
        description: fields.description.unwrap_or_default(),
        date_time,
        venue: fields.venue.unwrap_or_default(),
        location,
        price: fields.price.unwrap_or(0.0),
        ticket_limit: fields.ticket_limit.unwrap_or(0),
        coordinates: fields.coordinates.unwrap_or_default(),
        category: non_empty(fields.category).unwrap_or_else(|| "General".to_string()),
        banner,
        banner_id: banner_id.clone(),
        host_id: principal.id,
    };

    let row = match state.db(move |db| db.insert_event(&new_event)).await {
        Ok(row) => row,
        Err(e) => {
            release_asset(&state, &banner_id).await;
            return Err(e);
        }
    };

    info!("Event {} '{}' created by {}", row.id, row.title, principal.username);

    Ok((
        StatusCode::CREATED,
        Json(EventResponse {
            message: "Event created successfully".to_string(),
            event: Event::from(row),
        }),
    ))
}

pub async fn list_events(State(state): State<AppState>) -> ApiResult<Json<EventListResponse>> {
    let rows = state.db(|db| db.list_events()).await?;
    Ok(Json(EventListResponse {
        events: rows.into_iter().map(Event::from).collect(),
    }))
}

pub async fn list_events_by_host(
    State(state): State<AppState>,
    Path(host_id): Path<Uuid>,
) -> ApiResult<Json<EventListResponse>> {
    let rows = state.db(move |db| db.list_events_by_host(host_id)).await?;
    Ok(Json(EventListResponse {
        events: rows.into_iter().map(Event::from).collect(),
    }))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Json<EventResponse>> {
    let row = state
        .db(move |db| db.get_event(event_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;

    Ok(Json(EventResponse {
        message: "Event fetched successfully".to_string(),
        event: Event::from(row),
    }))
}

/// Partial update. A replacement banner is stored before the record is
/// touched, and the old one is only released once the record points at the
/// new one.
pub async fn update_event(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(event_id): Path<Uuid>,
    form: EventForm,
) -> ApiResult<Json<EventResponse>> {
    authorize(Operation::ManageEvents, &principal)?;

    let existing = state
        .db(move |db| db.get_event(event_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    require_owner_or_admin(&principal, existing.host_id)?;

    let fields = form.fields;
    validate(&fields)?;

    let mut patch = EventPatch {
        title: non_empty(fields.title),
        description: fields.description,
        date_time: fields.date_time,
        venue: fields.venue,
        location: non_empty(fields.location),
        price: fields.price,
        ticket_limit: fields.ticket_limit,
        coordinates: fields.coordinates,
        category: non_empty(fields.category),
        banner: None,
        banner_id: None,
    };

    let new_asset = match form.banner {
        Some(banner) => Some(store_banner(&state, banner).await?),
        None => None,
    };
    if let Some(asset) = &new_asset {
        patch.banner = Some(asset.url.clone());
        patch.banner_id = Some(asset.id.clone());
    }

    let row = match state.db(move |db| db.update_event(event_id, &patch)).await {
        Ok(Some(row)) => row,
        failed => {
            if let Some(asset) = &new_asset {
                release_asset(&state, &asset.id).await;
            }
            return Err(failed.err().unwrap_or_else(|| ApiError::not_found("Event")));
        }
    };

    if new_asset.is_some() {
        release_asset(&state, &existing.banner_id).await;
    }

    info!("Event {} updated by {}", event_id, principal.username);

    Ok(Json(EventResponse {
        message: "Event updated successfully".to_string(),
        event: Event::from(row),
    }))
}

/// Tickets for the event are kept as history; only the banner goes with it.
pub async fn delete_event(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    authorize(Operation::ManageEvents, &principal)?;

    let existing = state
        .db(move |db| db.get_event(event_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    require_owner_or_admin(&principal, existing.host_id)?;

    let deleted = state
        .db(move |db| db.delete_event(event_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    release_asset(&state, &deleted.banner_id).await;

    info!("Event {} deleted by {}", event_id, principal.username);

    Ok(Json(serde_json::json!({ "message": "Event deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use eventify_types::models::Role;
    use serde_json::json;

    use super::*;
    use crate::test_support::{TestApp, json_request};

    const BOUNDARY: &str = "eventify-test-boundary";

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 1, 2, 3];

    fn multipart_request(
        method: &str,
        uri: &str,
        token: &str,
        text: &[(&str, &str)],
        banner: &[u8],
    ) -> Request<Body> {
        let b = BOUNDARY;
        let mut body = Vec::new();
        for (name, value) in text {
            body.extend_from_slice(
                format!(
                    "--{b}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"banner\"; filename=\"b.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(banner);
        body.extend_from_slice(format!("\r\n--{b}--\r\n").as_bytes());

        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn form_values_parse() {
        assert_eq!(parse_coordinates("[73.85, 18.52]"), Some(vec![73.85, 18.52]));
        assert_eq!(parse_coordinates("73.85, 18.52"), Some(vec![73.85, 18.52]));
        assert_eq!(parse_coordinates("east"), None);
        assert!(parse_date_time("2026-05-01T18:00").is_some());
        assert!(parse_date_time("2026-05-01T18:00:00+05:30").is_some());
        assert!(parse_date_time("tomorrow").is_none());
    }

    #[tokio::test]
    async fn host_creates_event_from_json() {
        let app = TestApp::new();
        let host = app.user(Role::Host);

        let (status, body) = app
            .post_json(
                "/api/events",
                Some(&app.token(&host)),
                json!({
                    "title": "Launch Party",
                    "dateTime": "2026-12-01T18:00:00Z",
                    "location": "Mumbai",
                    "price": 250.0,
                    "ticketLimit": 50
                }),
            )
            .await;
        assert_eq!(status, 201, "{body}");
        assert_eq!(body["event"]["ticketCount"], 0);
        assert_eq!(body["event"]["category"], "General");
        assert_eq!(body["event"]["host"]["id"], host.id.to_string());

        let (status, listed) = app.get(&format!("/api/events/host/{}", host.id), None).await;
        assert_eq!(status, 200);
        assert_eq!(listed["events"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_requires_role_and_fields() {
        let app = TestApp::new();
        let fan = app.user(Role::User);
        let host = app.user(Role::Host);
        let event = json!({ "title": "X", "dateTime": "2026-12-01T18:00:00Z", "location": "Goa" });

        let (status, _) = app.post_json("/api/events", Some(&app.token(&fan)), event).await;
        assert_eq!(status, 403);

        let (status, body) = app
            .post_json("/api/events", Some(&app.token(&host)), json!({ "title": "X" }))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn replacing_banner_releases_old_asset() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let token = app.token(&host);

        let (status, created) = app
            .call(multipart_request(
                "POST",
                "/api/events",
                &token,
                &[("title", "Gig"), ("dateTime", "2026-11-02T20:00"), ("location", "Pune"), ("coordinates", "73.8,18.5")],
                PNG,
            ))
            .await;
        assert_eq!(status, 201, "{created}");
        let first_asset = created["event"]["bannerId"].as_str().unwrap().to_string();
        assert!(!first_asset.is_empty());
        assert_eq!(created["event"]["coordinates"], json!([73.8, 18.5]));

        let id = created["event"]["id"].as_str().unwrap();
        let (status, updated) = app
            .call(multipart_request("PUT", &format!("/api/events/{}", id), &token, &[("price", "75")], PNG))
            .await;
        assert_eq!(status, 200, "{updated}");
        assert_eq!(updated["event"]["price"], 75.0);
        assert_ne!(updated["event"]["bannerId"], first_asset.as_str());
        assert_eq!(*app.media.deleted.lock().unwrap(), vec![first_asset]);

        let (status, _) = app
            .call(json_request("DELETE", &format!("/api/events/{}", id), Some(&token), json!({})))
            .await;
        assert_eq!(status, 200);
        assert_eq!(app.media.deleted.lock().unwrap().len(), 2);

        let (status, _) = app.get(&format!("/api/events/{}", id), None).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn banner_size_is_capped_at_the_media_limit() {
        let app = TestApp::new();
        let host = app.user(Role::Host);
        let token = app.token(&host);
        let fields = [("title", "Expo"), ("dateTime", "2026-11-02T20:00"), ("location", "Pune")];

        let large = vec![7u8; 3 * 1024 * 1024];
        let (status, body) = app
            .call(multipart_request("POST", "/api/events", &token, &fields, &large))
            .await;
        assert_eq!(status, 201, "{body}");
        assert_eq!(app.media.stored.lock().unwrap().len(), 1);

        let oversized = vec![7u8; MAX_BANNER_BYTES + 1];
        let (status, body) = app
            .call(multipart_request("POST", "/api/events", &token, &fields, &oversized))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "VALIDATION_ERROR");
        assert_eq!(app.media.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_owner_or_admin_may_modify() {
        let app = TestApp::new();
        let owner = app.user(Role::Host);
        let rival = app.user(Role::Host);
        let admin = app.user(Role::Admin);
        let event = app.event(owner.id, 10);
        let uri = format!("/api/events/{}", event);

        let (status, _) = app
            .call(json_request("PUT", &uri, Some(&app.token(&rival)), json!({ "title": "Mine now" })))
            .await;
        assert_eq!(status, 403);

        let (status, body) = app
            .call(json_request("PUT", &uri, Some(&app.token(&admin)), json!({ "title": "Renamed" })))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["event"]["title"], "Renamed");
        assert_eq!(body["event"]["location"], "Pune");
    }
}
