use crate::error::{ApiError, EngineError};
use crate::format::AssetFormat;
use crate::resolve::{self, ServeRequest, Served, SizeSpec};
use crate::state::AppState;
use crate::variants;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    let max_upload = state.config.max_upload_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/assets/{id}/file", get(serve_file))
        .route("/assets/{id}/derivatives", get(list_derivatives))
        .route(
            "/assets/{id}/variants/{variant}",
            put(upload_variant)
                .delete(remove_variant)
                .layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/assets/{id}", delete(delete_asset))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    format: Option<String>,
    variant: Option<String>,
    size: Option<u32>,
    preserve_ratio: Option<bool>,
    preserve_vector: Option<bool>,
}

async fn serve_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            AssetFormat::parse(raw)
                .ok_or_else(|| ApiError::from(EngineError::UnsupportedFormat(raw.to_string())))?,
        ),
    };
    let dark = parse_variant(query.variant.as_deref())?;
    let size = match query.size {
        Some(0) => return Err(ApiError::bad_request("size must be positive")),
        Some(width) => Some(SizeSpec {
            width,
            preserve_ratio: query.preserve_ratio.unwrap_or(true),
            preserve_vector: query.preserve_vector.unwrap_or(false),
        }),
        None => None,
    };
    let request = ServeRequest {
        asset_id: id,
        format,
        dark,
        size,
    };
    let served = resolve::resolve(&state, &request).await.map_err(ApiError::from)?;
    Ok(served_response(served, &headers))
}

fn parse_variant(raw: Option<&str>) -> Result<bool, ApiError> {
    match raw {
        None | Some("") | Some("light") => Ok(false),
        Some("dark") => Ok(true),
        Some(other) => Err(ApiError::bad_request(&format!(
            "unknown variant `{other}`"
        ))),
    }
}

fn served_response(served: Served, request_headers: &HeaderMap) -> Response {
    let etag = format!("\"{}\"", sha256_hex(&served.bytes));
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&served.mime)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).unwrap_or(HeaderValue::from_static("\"\"")),
    );
    headers.insert(
        "X-Convert-Cache",
        HeaderValue::from_static(if served.cache_hit { "HIT" } else { "MISS" }),
    );
    headers.insert(
        "X-Convert-Fidelity",
        HeaderValue::from_static(served.fidelity.label()),
    );
    if served.fell_back_to_light {
        headers.insert("X-Convert-Variant-Fallback", HeaderValue::from_static("light"));
    }
    if matches_etag(request_headers, &etag) {
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }
    (headers, served.bytes).into_response()
}

fn matches_etag(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    value.split(',').any(|candidate| candidate.trim() == etag)
}

async fn list_derivatives(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.db.get_source_asset(&id).await.map_err(ApiError::from)?.is_none() {
        return Err(ApiError::not_found("asset not found"));
    }
    let formats = state.store.list_formats(&id).await.map_err(ApiError::from)?;
    let entries = formats
        .into_iter()
        .map(|(format, is_dark)| {
            serde_json::json!({
                "format": format.extension(),
                "variant": if is_dark { "dark" } else { "light" },
            })
        })
        .collect::<Vec<_>>();
    Ok(Json(serde_json::json!({ "asset": id, "derivatives": entries })))
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    format: Option<String>,
    client: Option<String>,
}

async fn upload_variant(
    State(state): State<Arc<AppState>>,
    Path((id, variant)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let is_dark = match variant.as_str() {
        "light" => false,
        "dark" => true,
        other => {
            return Err(ApiError::bad_request(&format!(
                "unknown variant `{other}`"
            )))
        }
    };
    if body.is_empty() {
        return Err(ApiError::bad_request("empty upload body"));
    }
    let format = resolve_upload_format(&query, &headers, &body)?;
    let source_limit = if format == AssetFormat::Svg {
        state.config.max_svg_bytes
    } else {
        state.config.max_raster_bytes
    };
    if body.len() > source_limit {
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "upload exceeds source size limit",
        ));
    }
    let mime = format.mime().essence_str().to_string();
    let client_id = query.client.unwrap_or_default();
    let summary = variants::set_variant(
        &state,
        &id,
        &client_id,
        is_dark,
        body.to_vec(),
        format.extension(),
        &mime,
    )
    .await
    .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({
        "asset": id,
        "variant": if is_dark { "dark" } else { "light" },
        "format": format.extension(),
        "version": summary.version,
        "generated": summary.generated,
        "failed": summary.failed,
    })))
}

/// Upload format precedence: explicit `?format=` wins, then the request
/// Content-Type, then content sniffing.
fn resolve_upload_format(
    query: &UploadQuery,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<AssetFormat, ApiError> {
    if let Some(raw) = query.format.as_deref() {
        return AssetFormat::parse(raw)
            .ok_or_else(|| ApiError::bad_request(&format!("unsupported format `{raw}`")));
    }
    if let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        if !essence.is_empty() && essence != "application/octet-stream" {
            if let Some(format) = AssetFormat::from_mime(essence) {
                return Ok(format);
            }
        }
    }
    if crate::vector::is_svg(body) {
        return Ok(AssetFormat::Svg);
    }
    match image::guess_format(body).ok() {
        Some(image::ImageFormat::Png) => Ok(AssetFormat::Png),
        Some(image::ImageFormat::Jpeg) => Ok(AssetFormat::Jpg),
        Some(image::ImageFormat::Gif) => Ok(AssetFormat::Gif),
        Some(image::ImageFormat::WebP) => Ok(AssetFormat::Webp),
        _ => Err(ApiError::bad_request("could not determine upload format")),
    }
}

async fn remove_variant(
    State(state): State<Arc<AppState>>,
    Path((id, variant)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    match variant.as_str() {
        "dark" => {}
        "light" => {
            return Err(ApiError::bad_request(
                "the light variant is removed by deleting the asset",
            ))
        }
        other => {
            return Err(ApiError::bad_request(&format!(
                "unknown variant `{other}`"
            )))
        }
    }
    variants::remove_variant(&state, &id)
        .await
        .map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_asset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    variants::delete_asset(&state, &id)
        .await
        .map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
