//! Boundary handlers for the ICYCast HTTP surface.
//!
//! Ce module fournit les handlers axum (stream, meta, cover, listing) et la
//! documentation OpenAPI associée.  Les handlers restent de simples
//! adaptateurs: résolution de la station dans le registre puis délégation au
//! superviseur.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use icystation::{icy, StationRegistry};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use utoipa::{OpenApi, ToSchema};

/// État partagé des handlers
#[derive(Clone)]
pub struct AppState {
    registry: Arc<StationRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<StationRegistry>) -> Self {
        Self { registry }
    }
}

/// Métadonnées courantes d'une station
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StationMetaResponse {
    /// Texte ICY courant (vide si rien n'est publié)
    pub current: String,
    /// Dernier rafraîchissement réussi (RFC3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// La source upstream délivre-t-elle des octets ?
    #[serde(rename = "sourceHealthy")]
    pub source_healthy: bool,
}

/// Entrée du listing des stations
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StationInfo {
    /// Identifiant de la station
    pub id: String,
    /// Chemin du flux audio
    pub stream_url: String,
    /// Chemin des métadonnées
    pub meta_url: String,
    /// Nombre de sessions attachées
    pub clients: usize,
    /// Santé de la source upstream
    #[serde(rename = "sourceHealthy")]
    pub source_healthy: bool,
}

/// Réponse du healthcheck
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
}

/// GET /{station}/stream - Flux audio avec métadonnées ICY
///
/// Le header `Icy-MetaData: 1` négocie l'injection de blocs ICY; la réponse
/// annonce alors `icy-metaint`.
#[utoipa::path(
    get,
    path = "/{station}/stream",
    params(
        ("station" = String, Path, description = "Identifiant de la station")
    ),
    responses(
        (status = 200, description = "Flux audio continu", content_type = "audio/mpeg"),
        (status = 404, description = "Station inconnue")
    ),
    tag = "ICYCast"
)]
async fn stream_station(
    State(state): State<AppState>,
    Path(station_id): Path<String>,
    request_headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let station = state.registry.get(&station_id).ok_or(StatusCode::NOT_FOUND)?;

    let wants_meta = request_headers
        .get("icy-metadata")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim() == "1")
        .unwrap_or(false);

    debug!(station = %station_id, wants_meta, "Listener connecting");
    let stream = station.attach(wants_meta);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    headers.insert(
        HeaderName::from_static("icy-name"),
        HeaderValue::from_str(station.icy_name())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert(
        HeaderName::from_static("icy-br"),
        HeaderValue::from(station.bitrate_hint_kbps()),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    if wants_meta {
        headers.insert(
            HeaderName::from_static("icy-metaint"),
            HeaderValue::from(station.metaint() as u64),
        );
    }

    Ok((headers, Body::from_stream(stream)))
}

/// GET /{station}/meta - Métadonnées courantes d'une station
#[utoipa::path(
    get,
    path = "/{station}/meta",
    params(
        ("station" = String, Path, description = "Identifiant de la station")
    ),
    responses(
        (status = 200, description = "Métadonnées courantes", body = StationMetaResponse),
        (status = 404, description = "Station inconnue")
    ),
    tag = "ICYCast"
)]
async fn station_meta(
    State(state): State<AppState>,
    Path(station_id): Path<String>,
) -> Result<Json<StationMetaResponse>, StatusCode> {
    let station = state.registry.get(&station_id).ok_or(StatusCode::NOT_FOUND)?;

    let meta = station.current_meta();
    Ok(Json(StationMetaResponse {
        current: meta
            .as_ref()
            .map(|m| m.icy_text.clone())
            .unwrap_or_default(),
        updated_at: meta.as_ref().map(|m| m.updated_at.to_rfc3339()),
        source_healthy: station.source_healthy(),
    }))
}

/// GET /{station}/cover - Redirige vers la pochette courante
///
/// L'URL est extraite du champ `Artwork='...';` du texte ICY publié.
#[utoipa::path(
    get,
    path = "/{station}/cover",
    params(
        ("station" = String, Path, description = "Identifiant de la station")
    ),
    responses(
        (status = 302, description = "Redirection vers la pochette"),
        (status = 404, description = "Station inconnue ou pas de pochette")
    ),
    tag = "ICYCast"
)]
async fn station_cover(
    State(state): State<AppState>,
    Path(station_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let station = state.registry.get(&station_id).ok_or(StatusCode::NOT_FOUND)?;
    let meta = station.current_meta().ok_or(StatusCode::NOT_FOUND)?;
    let artwork = icy::extract_kv(&meta.icy_text, "Artwork")
        .filter(|url| !url.is_empty())
        .ok_or(StatusCode::NOT_FOUND)?;
    // Le Redirect d'axum n'expose pas de 302; la réponse est construite à la main.
    let location = HeaderValue::from_str(artwork).map_err(|_| StatusCode::NOT_FOUND)?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]))
}

/// GET /stations - Liste les stations configurées
#[utoipa::path(
    get,
    path = "/stations",
    responses(
        (status = 200, description = "Liste des stations", body = Vec<StationInfo>)
    ),
    tag = "ICYCast"
)]
async fn list_stations(State(state): State<AppState>) -> Json<Vec<StationInfo>> {
    let mut stations: Vec<StationInfo> = state
        .registry
        .iter()
        .map(|station| StationInfo {
            id: station.id().to_string(),
            stream_url: format!("/{}/stream", station.id()),
            meta_url: format!("/{}/meta", station.id()),
            clients: station.status().clients,
            source_healthy: station.source_healthy(),
        })
        .collect();
    stations.sort_by(|a, b| a.id.cmp(&b.id));
    Json(stations)
}

/// GET /healthz - Healthcheck du process
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Process opérationnel", body = HealthResponse)
    ),
    tag = "ICYCast"
)]
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

/// Documentation OpenAPI pour l'API ICYCast
#[derive(OpenApi)]
#[openapi(
    info(
        title = "ICYCast API",
        version = "1.0.0",
        description = "Proxy multi-stations avec injection de métadonnées ICY"
    ),
    paths(stream_station, station_meta, station_cover, list_stations, healthz),
    components(schemas(StationMetaResponse, StationInfo, HealthResponse)),
    tags(
        (name = "ICYCast", description = "Endpoints de streaming et d'administration")
    )
)]
pub struct ApiDoc;

/// Crée le router de l'API
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/stations", get(list_stations))
        .route("/healthz", get(healthz))
        .route("/{station}/stream", get(stream_station))
        .route("/{station}/meta", get(station_meta))
        .route("/{station}/cover", get(station_cover))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn registry() -> Arc<StationRegistry> {
        let config: icyconfig::Config = serde_yaml::from_str(
            r#"
stations:
  - id: jazz
    icy: { name: "Jazz FM", metaint: 8192, bitrate_hint_kbps: 192 }
    source: { url: "http://127.0.0.1:9/a.mp3" }
    metadata: { url: "http://127.0.0.1:9/a.json" }
"#,
        )
        .unwrap();
        Arc::new(StationRegistry::from_config(&config).unwrap())
    }

    fn router() -> Router {
        create_router(AppState::new(registry()))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let response = router()
            .oneshot(Request::get("/healthz").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn unknown_station_is_404() {
        for route in ["/nope/stream", "/nope/meta", "/nope/cover"] {
            let response = router()
                .oneshot(Request::get(route).body(AxumBody::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "route {route}");
        }
    }

    #[tokio::test]
    async fn stations_listing_has_urls_and_health() {
        let response = router()
            .oneshot(Request::get("/stations").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let listing = body_json(response).await;
        assert_eq!(
            listing,
            serde_json::json!([{
                "id": "jazz",
                "stream_url": "/jazz/stream",
                "meta_url": "/jazz/meta",
                "clients": 0,
                "sourceHealthy": false
            }])
        );
    }

    #[tokio::test]
    async fn meta_endpoint_omits_timestamp_when_never_refreshed() {
        let response = router()
            .oneshot(Request::get("/jazz/meta").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let meta = body_json(response).await;
        assert_eq!(
            meta,
            serde_json::json!({"current": "", "sourceHealthy": false})
        );
    }

    #[tokio::test]
    async fn cover_is_404_without_artwork() {
        let response = router()
            .oneshot(Request::get("/jazz/cover").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_headers_follow_negotiation() {
        // Avec Icy-MetaData: 1 la réponse annonce icy-metaint.
        let response = router()
            .oneshot(
                Request::get("/jazz/stream")
                    .header("Icy-MetaData", "1")
                    .body(AxumBody::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("content-type").unwrap(), "audio/mpeg");
        assert_eq!(headers.get("icy-name").unwrap(), "Jazz FM");
        assert_eq!(headers.get("icy-br").unwrap(), "192");
        assert_eq!(headers.get("icy-metaint").unwrap(), "8192");
        assert_eq!(headers.get("cache-control").unwrap(), "no-store");

        // Sans négociation, pas d'icy-metaint.
        let response = router()
            .oneshot(Request::get("/jazz/stream").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("icy-metaint").is_none());
    }
}
