use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{handlers, line_auth, live, state::AppState};

fn cors_layer(allow_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allow_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

/// Create the main application router with all API endpoints
pub fn create_router(state: AppState, allow_origins: &[String]) -> Router {
    let mut router = Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Memo endpoints
        .route(
            "/kaimemo",
            get(handlers::get_kaimemo).post(handlers::create_kaimemo),
        )
        .route("/kaimemo/:id", delete(handlers::remove_kaimemo))
        // Amount records and summaries
        .route(
            "/kaimemo/summary",
            get(handlers::get_summary).post(handlers::create_amount),
        )
        .route("/kaimemo/summary/:id", delete(handlers::remove_amount))
        // Live updates
        .route("/kaimemo/ws", get(live::live_updates));

    // LINE login only when credentials are configured
    if state.line.is_some() {
        router = router
            .route("/line/login", get(line_auth::login))
            .route("/line/callback", get(line_auth::callback))
            .route("/line/logout", get(line_auth::logout).post(line_auth::logout))
            .route("/line/me", get(line_auth::me));
    }

    router
        .with_state(state)
        .layer(cors_layer(allow_origins))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::Broadcaster;
    use crate::line_auth::LineAuthProvider;
    use crate::repository::MemoryKaimemoRepository;
    use crate::session::SessionStore;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use line_client::{LineError, LineProfile};
    use serde_json::{json, Value};
    use settings_loader::BroadcastScope;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeLine {
        exchanges: AtomicUsize,
    }

    #[async_trait]
    impl LineAuthProvider for FakeLine {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://line.example/authorize?state={state}")
        }

        async fn exchange_code(&self, code: &str) -> Result<String, LineError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{code}"))
        }

        async fn fetch_profile(&self, _access_token: &str) -> Result<LineProfile, LineError> {
            Ok(LineProfile {
                user_id: "U-line".to_string(),
                display_name: "Hanako".to_string(),
                picture_url: None,
            })
        }
    }

    fn app_state(line: Option<Arc<FakeLine>>) -> AppState {
        AppState::new(
            Arc::new(MemoryKaimemoRepository::new()),
            Arc::new(Broadcaster::new(BroadcastScope::Owner)),
            Arc::new(SessionStore::new(chrono::Duration::hours(24))),
            line.map(|fake| fake as Arc<dyn LineAuthProvider>),
            false,
        )
    }

    fn app(state: AppState) -> Router {
        create_router(state, &["http://localhost:5173".to_string()])
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect()
    }

    /// `name=value` part of the first Set-Cookie for `name`.
    fn cookie_pair(cookies: &[String], name: &str) -> String {
        cookies
            .iter()
            .find(|cookie| cookie.starts_with(&format!("{name}=")))
            .and_then(|cookie| cookie.split(';').next())
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let router = app(app_state(None));
        let response = send(&router, get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_missing_owner_is_bad_request() {
        let router = app(app_state(None));

        let response = send(&router, get("/kaimemo")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "tempUserID is required");

        let response = send(&router, get("/kaimemo/summary")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_then_list_and_delete() {
        let router = app(app_state(None));

        let response = send(
            &router,
            post_json("/kaimemo", json!({"tempUserID": "u1", "tag": "food", "name": "Milk"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = send(&router, get("/kaimemo?tempUserID=u1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let memos = body_json(response).await;
        assert_eq!(memos.as_array().unwrap().len(), 1);
        assert_eq!(memos[0]["name"], "Milk");
        assert_eq!(memos[0]["done"], false);

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/kaimemo/{id}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"tempUserID": "u1"}).to_string()))
            .unwrap();
        assert_eq!(send(&router, request).await.status(), StatusCode::OK);

        let response = send(&router, get("/kaimemo?tempUserID=u1")).await;
        assert!(body_json(response).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let router = app(app_state(None));
        let request = Request::builder()
            .method("POST")
            .uri("/kaimemo?tempUserID=u1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn test_summary_endpoints() {
        let router = app(app_state(None));

        for (date, amount) in [("2023-05-15", 1000), ("2023-05-16", 500), ("2023-06-01", 2000)] {
            let response = send(
                &router,
                post_json(
                    "/kaimemo/summary",
                    json!({"tempUserID": "u1", "date": date, "tag": "food", "amount": amount}),
                ),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = send(&router, get("/kaimemo/summary?tempUserID=u1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let summary = body_json(response).await;

        let weekly = summary["weeklySummaries"].as_array().unwrap();
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0]["weekStart"], "2023-05-14");
        assert_eq!(weekly[0]["weekEnd"], "2023-05-20");
        assert_eq!(weekly[0]["totalAmount"], 1500);

        let monthly = summary["monthlySummaries"].as_array().unwrap();
        assert_eq!(monthly[0]["month"], "2023-05");
        assert_eq!(monthly[1]["totalAmount"], 2000);
    }

    #[tokio::test]
    async fn test_delete_amount_with_owner_in_body() {
        let router = app(app_state(None));
        let response = send(
            &router,
            post_json(
                "/kaimemo/summary",
                json!({"tempUserID": "u1", "date": "2023-05-15", "tag": "food", "amount": 1000}),
            ),
        )
        .await;
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/kaimemo/summary/{id}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"tempUserID": "u1"}).to_string()))
            .unwrap();
        assert_eq!(send(&router, request).await.status(), StatusCode::OK);

        let response = send(&router, get("/kaimemo/summary?tempUserID=u1")).await;
        let summary = body_json(response).await;
        assert!(summary["weeklySummaries"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_date_is_rejected() {
        let router = app(app_state(None));
        let response = send(
            &router,
            post_json(
                "/kaimemo/summary",
                json!({"tempUserID": "u1", "date": "2023/05/15", "tag": "food", "amount": 10}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_live_endpoint_requires_owner() {
        let router = app(app_state(None));
        let response = send(&router, get("/kaimemo/ws")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "tempUserID is required");
    }

    #[tokio::test]
    async fn test_line_routes_absent_without_credentials() {
        let router = app(app_state(None));
        let response = send(&router, get("/line/login")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_login_redirects_with_state_cookie() {
        let router = app(app_state(Some(Arc::new(FakeLine::default()))));
        let response = send(&router, get("/line/login")).await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        let state_pair = cookie_pair(&set_cookies(&response), "line_oauth_state");
        let state = state_pair.trim_start_matches("line_oauth_state=");
        assert!(!state.is_empty());
        assert!(location.ends_with(&format!("state={state}")));
    }

    #[tokio::test]
    async fn test_callback_rejects_state_mismatch_before_exchange() {
        let fake = Arc::new(FakeLine::default());
        let router = app(app_state(Some(fake.clone())));

        let request = Request::builder()
            .uri("/line/callback?code=abc&state=received")
            .header(header::COOKIE, "line_oauth_state=expected")
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&router, get("/line/callback?code=abc&state=received")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(fake.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_callback_without_code() {
        let fake = Arc::new(FakeLine::default());
        let router = app(app_state(Some(fake.clone())));

        let request = Request::builder()
            .uri("/line/callback?state=s1")
            .header(header::COOKIE, "line_oauth_state=s1")
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "code is missing");
        assert_eq!(fake.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_session_lifecycle() {
        let fake = Arc::new(FakeLine::default());
        let router = app(app_state(Some(fake.clone())));

        let request = Request::builder()
            .uri("/line/callback?code=abc&state=s1")
            .header(header::COOKIE, "line_oauth_state=s1")
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fake.exchanges.load(Ordering::SeqCst), 1);

        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c.starts_with("line_oauth_state=;") && c.contains("Max-Age=0")));
        let session = cookie_pair(&cookies, "session");
        assert!(session.starts_with("session=session-"));
        assert_eq!(body_json(response).await["message"], "Login successful");

        let request = Request::builder()
            .uri("/line/me")
            .header(header::COOKIE, &session)
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let profile = body_json(response).await;
        assert_eq!(profile["userId"], "U-line");
        assert_eq!(profile["displayName"], "Hanako");

        // The session user owns memos created without an explicit tempUserID
        let request = Request::builder()
            .method("POST")
            .uri("/kaimemo")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::COOKIE, &session)
            .body(Body::from(json!({"tag": "food", "name": "Natto"}).to_string()))
            .unwrap();
        assert_eq!(send(&router, request).await.status(), StatusCode::CREATED);
        let response = send(&router, get("/kaimemo?tempUserID=U-line")).await;
        assert_eq!(body_json(response).await[0]["name"], "Natto");

        let request = Request::builder()
            .method("POST")
            .uri("/line/logout")
            .header(header::COOKIE, &session)
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookies(&response)[0].contains("Max-Age=0"));

        let request = Request::builder()
            .uri("/line/me")
            .header(header::COOKIE, &session)
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, request).await.status(), StatusCode::UNAUTHORIZED);
    }
}
