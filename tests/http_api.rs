use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use meteo::config::MeteoConfig;
use meteo::{AppState, SearchCriteria, web};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn app(server: &MockServer) -> (tempfile::TempDir, AppState, Router) {
    let mut config = MeteoConfig::default();
    config.geocoding.base_url = format!("{}/v1", server.uri());
    config.weather.base_url = format!("{}/v1", server.uri());

    let dir = tempfile::tempdir().unwrap();
    let db = fjall::Database::builder(dir.path().join("db")).open().unwrap();
    let state = AppState::from_config(&config, &db).unwrap();
    let router = web::app(state.clone(), dir.path().join("static").to_str().unwrap());
    (dir, state, router)
}

async fn get(router: &Router, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, Option<String>, Value) {
    let mut request = Request::builder().uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, cookie, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn mount_moscow(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [
            {"name": "Москва", "latitude": 55.75, "longitude": 37.61, "country": "Россия",
             "country_code": "RU", "admin1": "Москва", "population": 10_381_222},
            {"name": "Moskva", "latitude": 57.1, "longitude": 36.0, "population": 50}
        ]})))
        .mount(server)
        .await;

    let hours = 48;
    let times: Vec<i64> = (0..hours).map(|i| 1_792_357_200 + i * 3600).collect();
    let filled = |v: f64| vec![v; hours as usize];
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timezone": "Europe/Moscow",
            "current": {
                "temperature_2m": 5.0, "apparent_temperature": 3.0,
                "relative_humidity_2m": 80, "rain": 0.0, "is_day": 0
            },
            "hourly": {
                "time": times,
                "temperature_2m": filled(5.0),
                "apparent_temperature": filled(3.0),
                "relative_humidity_2m": filled(80.0),
                "rain": filled(0.0),
                "is_day": filled(0.0),
                "wind_speed_10m": filled(4.0)
            }
        })))
        .mount(server)
        .await;
}

fn query(city: &str) -> String {
    format!("/?city={}", urlencoding::encode(city))
}

#[tokio::test]
async fn test_empty_search_page() {
    let server = MockServer::start().await;
    let (_dir, _state, router) = app(&server);

    let (status, cookie, body) = get(&router, "/", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cookie.is_none());
    assert_eq!(body["hourly_by_day"], json!([]));
    assert_eq!(body["city_history"], json!([]));
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_missing_city_is_still_ok() {
    let server = MockServer::start().await;
    let (_dir, _state, router) = app(&server);

    let (status, _, body) = get(&router, "/?city=", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], json!("Нужно ввести название города!"));
}

#[tokio::test]
async fn test_anonymous_history_follows_session_cookie() {
    let server = MockServer::start().await;
    mount_moscow(&server).await;
    let (_dir, _state, router) = app(&server);

    let (status, cookie, body) = get(&router, &query("Москва"), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["city_name"], json!("Москва"));
    let cookie = cookie.expect("session cookie");
    assert!(cookie.starts_with("meteo_session="));
    assert!(cookie.contains("HttpOnly"));

    let session = cookie.split(';').next().unwrap().to_string();
    let (_, _, body) = get(&router, "/", &[("cookie", session.as_str())]).await;
    let history = body["city_history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["city"], json!("Москва"));
    assert!(history[0]["replay_query"].as_str().unwrap().ends_with("history=true"));

    let (_, _, body) = get(&router, "/", &[]).await;
    assert_eq!(body["city_history"], json!([]));
}

#[tokio::test]
async fn test_remote_user_history_is_durable() {
    let server = MockServer::start().await;
    mount_moscow(&server).await;
    let (_dir, _state, router) = app(&server);

    let (_, cookie, _) = get(&router, &query("Москва"), &[("x-remote-user", "alice")]).await;
    assert!(cookie.is_none());

    let (_, _, body) = get(&router, "/", &[("x-remote-user", "alice")]).await;
    assert_eq!(body["city_history"].as_array().unwrap().len(), 1);

    let (_, _, body) = get(&router, "/", &[("x-remote-user", "bob")]).await;
    assert_eq!(body["city_history"], json!([]));
}

#[tokio::test]
async fn test_total_city_searched_sorted_by_count() {
    let server = MockServer::start().await;
    let (_dir, state, router) = app(&server);

    for city in ["Тула", "Сочи", "Тула", "Анапа", "Сочи", "Тула"] {
        let criteria = SearchCriteria::new(city, None, None, None, 3);
        state
            .search
            .ledger()
            .record_for_statistics(&criteria)
            .await
            .unwrap();
    }

    let (status, _, body) = get(&router, "/total-city-searched/", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"city": "Тула", "count": 3},
            {"city": "Сочи", "count": 2},
            {"city": "Анапа", "count": 1}
        ])
    );
}

#[tokio::test]
async fn test_autocomplete_sorted_by_population() {
    let server = MockServer::start().await;
    mount_moscow(&server).await;
    let (_dir, _state, router) = app(&server);

    let uri = format!("/search-field/?q={}", urlencoding::encode("Моск"));
    let (status, _, body) = get(&router, &uri, &[]).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Москва", "Moskva"]);
    assert_eq!(body[0]["admin1"], json!("Москва"));
}

#[tokio::test]
async fn test_autocomplete_without_query_is_empty() {
    let server = MockServer::start().await;
    let (_dir, _state, router) = app(&server);

    let (status, _, body) = get(&router, "/search-field/", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_autocomplete_upstream_failure_is_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let (_dir, _state, router) = app(&server);

    let (status, _, body) = get(&router, "/search-field/?q=abc", &[]).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, json!({"error": "Ошибка при запросе геоданных"}));
}

#[tokio::test]
async fn test_forecast_outage_answers_generic_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [
            {"name": "Москва", "latitude": 55.75, "longitude": 37.61, "country": "Россия",
             "country_code": "RU", "admin1": "Москва"}
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream maintenance"))
        .mount(&server)
        .await;
    let (_dir, _state, router) = app(&server);

    let (status, cookie, body) = get(&router, &query("Москва"), &[]).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(cookie.is_none());
    assert_eq!(body, json!({"error": "Сервис временно недоступен, попробуйте позже"}));
}
