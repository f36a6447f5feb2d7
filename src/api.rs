use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::config::MeteoConfig;
use crate::geocoding::GeoResolver;
use crate::history::{HistoryLedger, Viewer};
use crate::models::{CityCount, GeoMatch};
use crate::search::{SearchContext, SearchParams, SearchService};
use crate::session::{SESSION_COOKIE, Session, SessionStore};
use crate::store::FjallHistoryStore;
use crate::weather::ForecastClient;
use crate::MeteoError;

/// Header set by the authenticating proxy
pub const REMOTE_USER_HEADER: &str = "x-remote-user";

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchService<FjallHistoryStore>>,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn from_config(config: &MeteoConfig, db: &fjall::Database) -> anyhow::Result<Self> {
        let history = FjallHistoryStore::open(db).context("Failed to open history keyspace")?;
        let ttl = Duration::from_secs(u64::from(config.storage.session_ttl_hours) * 3600);
        let sessions = SessionStore::open(db, ttl).context("Failed to open session keyspace")?;

        let search = SearchService::new(
            GeoResolver::new(&config.geocoding)?,
            ForecastClient::new(&config.weather)?,
            HistoryLedger::new(history),
        );

        Ok(Self {
            search: Arc::new(search),
            sessions,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(search_city))
        .route("/search-field/", get(autocomplete_city))
        .route("/total-city-searched/", get(total_city_searched))
        .with_state(state)
}

#[derive(Deserialize)]
struct AutocompleteQuery {
    #[serde(default)]
    q: String,
}

fn remote_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REMOTE_USER_HEADER)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(str::to_string)
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn session_set_cookie(session: &Session, ttl: Duration) -> Result<HeaderValue, ApiError> {
    let cookie = format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id(),
        ttl.as_secs()
    );
    HeaderValue::from_str(&cookie)
        .map_err(|e| ApiError::internal(MeteoError::storage(format!("Invalid session cookie: {e}"))))
}

/// Failed request, answered with `{"error": <user message>}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: MeteoError,
}

impl ApiError {
    pub fn internal(error: MeteoError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error,
        }
    }

    /// Upstream lookup failed
    pub fn upstream(error: MeteoError) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            error,
        }
    }
}

impl From<MeteoError> for ApiError {
    fn from(error: MeteoError) -> Self {
        Self::internal(error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.error);
        } else {
            warn!("Request failed with {}: {}", self.status, self.error);
        }
        let body = Json(json!({ "error": self.error.user_message() }));
        (self.status, body).into_response()
    }
}

async fn search_city(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let params = SearchParams::extract(pairs);
    let now = Utc::now();

    if let Some(user) = remote_user(&headers) {
        let mut viewer = Viewer::Authenticated(&user);
        let context = state.search.search(&params, &mut viewer, now).await?;
        return Ok(Json(context).into_response());
    }

    let mut session = state
        .sessions
        .load(session_cookie(&headers).as_deref())
        .await?;

    let context: SearchContext = {
        let mut viewer = Viewer::Anonymous(&mut session);
        state.search.search(&params, &mut viewer, now).await?
    };

    let mut response = Json(context).into_response();
    if session.is_modified() {
        state.sessions.save(&session).await?;
        let cookie = session_set_cookie(&session, state.sessions.ttl())?;
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

async fn autocomplete_city(
    State(state): State<AppState>,
    Query(query): Query<AutocompleteQuery>,
) -> Result<Json<Vec<GeoMatch>>, ApiError> {
    let suggestions = state
        .search
        .geo()
        .suggest(&query.q)
        .await
        .map_err(ApiError::upstream)?;
    Ok(Json(suggestions))
}

async fn total_city_searched(
    State(state): State<AppState>,
) -> Result<Json<Vec<CityCount>>, ApiError> {
    let counts = state.search.ledger().statistics().await?;
    Ok(Json(counts))
}
