use crate::config::Config;
use crate::gate::{SubmissionError, SubmissionGate};
use crate::types::{FeedbackKind, FeedbackRecord, RecordId, SubmissionPayload};
use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

const THANK_YOU: &str = "Thank you for your feedback!";
const SERVER_ERROR: &str = "Server error";

/// Builds the feedback API. Handlers are mounted at `/feedback` and
/// `/api/feedback`; anything else falls through to `static_dir` when set.
pub fn router(gate: Arc<SubmissionGate>, config: &Config) -> Router {
    let mut router = Router::new()
        .route("/feedback", get(list_feedback).post(submit_feedback))
        .route("/api/feedback", get(list_feedback).post(submit_feedback))
        .with_state(gate);

    if let Some(dir) = &config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(cors_layer(config.cors_allowed_origins.as_deref()))
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let origin = match allowed_origins {
        None => AllowOrigin::any(),
        // Origins were checked by Config::validate
        Some(origins) => AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        ),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Serves `app` on `listener` until `shutdown` resolves, then drains
/// in-flight requests.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Deserialize, Debug)]
struct ListParams {
    limit: Option<usize>,
}

/// The submitted record as echoed back to the client.
#[derive(Serialize)]
struct SubmittedFeedback {
    id: RecordId,
    #[serde(rename = "employeeId")]
    employee_id: String,
    #[serde(flatten)]
    kind: FeedbackKind,
    timestamp: DateTime<Utc>,
}

impl From<FeedbackRecord> for SubmittedFeedback {
    fn from(record: FeedbackRecord) -> Self {
        SubmittedFeedback {
            id: record.id,
            employee_id: record.employee_id,
            kind: record.kind,
            timestamp: record.timestamp,
        }
    }
}

#[derive(Serialize)]
struct SubmitResponse {
    message: &'static str,
    feedback: SubmittedFeedback,
}

impl IntoResponse for SubmitResponse {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// The request could not be decoded.
    InvalidRequest(String),
    Submission(SubmissionError),
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        ApiError::Submission(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Submission(err @ SubmissionError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Submission(err @ SubmissionError::RateLimited { .. }) => {
                (StatusCode::TOO_MANY_REQUESTS, err.to_string())
            }
            // Details are logged where the failure happened
            ApiError::Submission(SubmissionError::Connection(_) | SubmissionError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR.to_string())
            }
        };

        let mut response = (status, Json(ApiErrorResponse { error: message })).into_response();

        if let ApiError::Submission(SubmissionError::RateLimited { retry_after }) = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after.as_secs()),
            );
        }

        response
    }
}

async fn submit_feedback(
    State(gate): State<Arc<SubmissionGate>>,
    payload: Result<Json<SubmissionPayload>, JsonRejection>,
) -> Result<SubmitResponse, ApiError> {
    let Json(payload) = payload?;
    let record = gate.submit(payload, Utc::now()).await?;

    Ok(SubmitResponse {
        message: THANK_YOU,
        feedback: record.into(),
    })
}

async fn list_feedback(
    State(gate): State<Arc<SubmissionGate>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<FeedbackRecord>>, ApiError> {
    let Query(params) = params?;
    Ok(Json(gate.list(params.limit).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::connection_cache::ConnectionCache;
    use crate::store::{MemoryConnector, MemoryStore};
    use crate::testutils::{BrokenConnector, default_test_config};
    use crate::types::FeedbackSchema;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app_with(config: &Config) -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        let connections = Arc::new(ConnectionCache::new(Arc::new(MemoryConnector::new(
            store.clone(),
        ))));
        let gate = Arc::new(SubmissionGate::from_config(connections, config));
        (store, router(gate, config))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_list() {
        let (_store, app) = app_with(&default_test_config());

        let response = app
            .clone()
            .oneshot(post(
                "/feedback",
                json!({
                    "employeeId": "emp-1",
                    "clientId": "device-1",
                    "rating": 5,
                    "comment": "  great service  ",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json_body(response).await;
        assert_eq!(body["message"], THANK_YOU);
        assert_eq!(body["feedback"]["employeeId"], "emp-1");
        assert_eq!(body["feedback"]["kind"], "rating");
        assert_eq!(body["feedback"]["rating"], 5);
        assert!(body["feedback"]["id"].is_string());
        assert!(body["feedback"].get("clientId").is_none());

        let response = app.oneshot(get_request("/api/feedback")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let listed = json_body(response).await;
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["comment"], "great service");
        assert!(listed[0].get("clientId").is_none());
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (store, app) = app_with(&default_test_config());

        let response = app
            .clone()
            .oneshot(post("/feedback", json!({"clientId": "d", "rating": 0})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());

        let malformed = Request::builder()
            .method(Method::POST)
            .uri("/feedback")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(malformed).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(get_request("/feedback?limit=many"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let delete = Request::builder()
            .method(Method::DELETE)
            .uri("/feedback")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        assert!(store.is_empty());

        let first = app
            .clone()
            .oneshot(post("/feedback", json!({"clientId": "d", "rating": 4})))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app
            .oneshot(post("/feedback", json!({"clientId": "d", "rating": 4})))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = second.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=3600).contains(&retry_after));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_500() {
        let config = default_test_config();
        let connections = Arc::new(ConnectionCache::new(Arc::new(BrokenConnector)));
        let gate = Arc::new(SubmissionGate::from_config(connections, &config));
        let app = router(gate, &config);

        let response = app
            .clone()
            .oneshot(post("/feedback", json!({"clientId": "d", "rating": 4})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await, json!({"error": SERVER_ERROR}));

        let response = app.oneshot(get_request("/feedback")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_reaction_deployment_and_limit() {
        let config = Config {
            schema: FeedbackSchema::Reaction,
            rate_limit: RateLimitConfig {
                enabled: false,
                window_secs: 0,
            },
            ..default_test_config()
        };
        let (_store, app) = app_with(&config);

        for reaction in ["like", "dislike", "like"] {
            let response = app
                .clone()
                .oneshot(post("/api/feedback", json!({"type": reaction})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app
            .clone()
            .oneshot(post("/api/feedback", json!({"type": "love"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get_request("/feedback?limit=2")).await.unwrap();
        let listed = json_body(response).await;
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0]["kind"], "reaction");
        assert!(listed[0].get("rating").is_none());
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let config = Config {
            cors_allowed_origins: Some(vec!["https://feedback.example.com".into()]),
            ..default_test_config()
        };
        let (_store, app) = app_with(&config);

        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri("/feedback")
            .header(header::ORIGIN, "https://feedback.example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(preflight).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://feedback.example.com"
        );

        let foreign = Request::builder()
            .uri("/feedback")
            .header(header::ORIGIN, "https://elsewhere.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(foreign).await.unwrap();
        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_static_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>Feedback</h1>").unwrap();

        let config = Config {
            static_dir: Some(dir.path().to_path_buf()),
            ..default_test_config()
        };
        let (_store, app) = app_with(&config);

        let response = app
            .clone()
            .oneshot(get_request("/index.html"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"<h1>Feedback</h1>");

        // API routes take precedence over the directory
        let response = app.oneshot(get_request("/feedback")).await.unwrap();
        assert_eq!(json_body(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let (_store, app) = app_with(&default_test_config());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, app, async {
            let _ = stop_rx.await;
        }));

        let client = reqwest::Client::new();
        let url = format!("http://{addr}/feedback");

        let response = client
            .post(&url)
            .json(&json!({"clientId": "tcp", "rating": "3", "comment": "via tcp"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);

        let listed: Vec<Value> = client.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["rating"], 3);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
