use crate::analytics::{scan_stats, STATS_SAMPLE_SIZE};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::extract::{JsonBody, QueryParams};
use crate::model::{
    CreateQrRequest, DeleteResponse, NewQrCode, Owner, QrCode, QrScan, QrUpdate, ScanStats,
    ScansQuery, DEFAULT_BG_COLOR, DEFAULT_FG_COLOR,
};
use crate::recorder::ScanMetadata;
use crate::resolver::{resolve, Resolution};
use crate::store::StoreError;
use crate::utils::{generate_short_code, parse_url, with_timeout};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use uuid::Uuid;

const CACHE_CONTROL_HEADER_VALUE: &str = "private, no-cache, no-store";
const UNAVAILABLE_REASON: &str = "unavailable";
const MAX_CREATE_ATTEMPTS: usize = 5;
const DEFAULT_SCANS_LIMIT: i64 = 20;

fn found(location: String) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location),
            (header::CACHE_CONTROL, CACHE_CONTROL_HEADER_VALUE.to_string()),
        ],
    )
        .into_response()
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::NotFound)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Always answers with a redirect. Lookup failures land on the landing page
/// with a reason; scan recording runs detached and cannot change the outcome.
pub async fn redirect(
    State(state): State<AppState>,
    Path(short_code): Path<String>,
    headers: HeaderMap,
) -> Response {
    let lookup = with_timeout(
        state.config.request_timeout_ms,
        resolve(state.store.as_ref(), &short_code),
    )
    .await;
    let location = match lookup {
        Ok(Ok(Resolution::Redirect { destination, qr_id })) => {
            state
                .recorder
                .dispatch(qr_id, ScanMetadata::from_headers(&headers));
            destination
        }
        Ok(Ok(resolution)) => {
            let reason = resolution.failure_reason().unwrap_or(UNAVAILABLE_REASON);
            tracing::debug!(%short_code, reason, "Redirect refused");
            state.config.landing_url_for(reason)
        }
        Ok(Err(err)) => {
            tracing::error!(%short_code, "Resolving short code failed: {}", err);
            state.config.landing_url_for(UNAVAILABLE_REASON)
        }
        Err(_) => state.config.landing_url_for(UNAVAILABLE_REASON),
    };
    found(location)
}

pub async fn create_qr_code(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    JsonBody(request): JsonBody<CreateQrRequest>,
) -> Result<(StatusCode, Json<QrCode>), ApiError> {
    let destination_url = parse_url(request.destination_url.as_deref().unwrap_or_default())?;
    let owner = match (caller, non_empty(request.anonymous_token)) {
        (Caller::Nobody, Some(token)) => Owner::Anonymous(token),
        (caller, _) => caller.owner()?,
    };
    let anonymous_limit = match owner {
        Owner::Anonymous(_) => Some(state.config.anonymous_qr_limit),
        Owner::User(_) => None,
    };
    let mut new_qr_code = NewQrCode {
        owner,
        short_code: String::new(),
        destination_url,
        title: non_empty(request.title),
        fg_color: non_empty(request.fg_color).unwrap_or_else(|| DEFAULT_FG_COLOR.into()),
        bg_color: non_empty(request.bg_color).unwrap_or_else(|| DEFAULT_BG_COLOR.into()),
    };
    for _ in 1..=MAX_CREATE_ATTEMPTS {
        new_qr_code.short_code = generate_short_code();
        let inserted = with_timeout(
            state.config.request_timeout_ms,
            state.store.insert(&new_qr_code, anonymous_limit),
        )
        .await?;
        match inserted {
            Ok(qr_code) => {
                tracing::info!(qr_id = %qr_code.id, short_code = %qr_code.short_code, "QR code created");
                return Ok((StatusCode::CREATED, Json(qr_code)));
            }
            Err(StoreError::DuplicateShortCode) => {
                tracing::debug!(short_code = %new_qr_code.short_code, "Short code collision");
            }
            Err(err) => return Err(err.into()),
        }
    }
    tracing::error!("Could not persist new QR code. Exhausted all retries of generating a unique short code");
    Err(StoreError::Backend("Could not generate a unique short code".into()).into())
}

pub async fn list_qr_codes(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<QrCode>>, ApiError> {
    let owner = caller.owner()?;
    let qr_codes = with_timeout(state.config.request_timeout_ms, state.store.list(&owner)).await??;
    Ok(Json(qr_codes))
}

async fn find_owned(state: &AppState, caller: &Caller, id: &str) -> Result<QrCode, ApiError> {
    let owner = caller.owner()?;
    let id = parse_id(id)?;
    with_timeout(state.config.request_timeout_ms, state.store.find(id, &owner))
        .await??
        .ok_or(ApiError::NotFound)
}

pub async fn get_qr_code(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<QrCode>, ApiError> {
    Ok(Json(find_owned(&state, &caller, &id).await?))
}

pub async fn update_qr_code(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    JsonBody(mut update): JsonBody<QrUpdate>,
) -> Result<Json<QrCode>, ApiError> {
    let owner = caller.owner()?;
    let id = parse_id(&id)?;
    if let Some(destination_url) = &update.destination_url {
        update.destination_url = Some(parse_url(destination_url)?);
    }
    update.title = update.title.map(non_empty);
    let qr_code = with_timeout(
        state.config.request_timeout_ms,
        state.store.update(id, &owner, &update),
    )
    .await??
    .ok_or(ApiError::NotFound)?;
    tracing::info!(qr_id = %qr_code.id, is_active = qr_code.is_active, "QR code updated");
    Ok(Json(qr_code))
}

pub async fn delete_qr_code(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let owner = caller.owner()?;
    let id = parse_id(&id)?;
    let deleted = with_timeout(state.config.request_timeout_ms, state.store.delete(id, &owner))
        .await??;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    tracing::info!(qr_id = %id, "QR code deleted");
    Ok(Json(DeleteResponse { success: true }))
}

pub async fn get_qr_stats(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<ScanStats>, ApiError> {
    let qr_code = find_owned(&state, &caller, &id).await?;
    let scans = with_timeout(
        state.config.request_timeout_ms,
        state.store.recent_scans(qr_code.id, STATS_SAMPLE_SIZE),
    )
    .await??;
    Ok(Json(scan_stats(&qr_code, &scans, Utc::now())))
}

pub async fn list_scans(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    QueryParams(query): QueryParams<ScansQuery>,
) -> Result<Json<Vec<QrScan>>, ApiError> {
    let qr_code = find_owned(&state, &caller, &id).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SCANS_LIMIT)
        .clamp(1, STATS_SAMPLE_SIZE);
    let scans = with_timeout(
        state.config.request_timeout_ms,
        state.store.recent_scans(qr_code.id, limit),
    )
    .await??;
    Ok(Json(scans))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
