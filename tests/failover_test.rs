//! Failover, redirect, backpressure, auth-renewal, and cancellation tests
//! against small canned-response servers.

use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use sanchaya_driver::{
    Authentication, ConfigStore, Method, Request, RoutingPolicy, SanchayaClient, ServerInfo,
    WriteTransaction,
};

const CT_JSON: [(HeaderName, &str); 1] = [(header::CONTENT_TYPE, "application/json")];

fn version_body() -> String {
    json!({"server": "sanchaya", "version": "0.6.0"}).to_string()
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A server that answers `/api/version`, counting hits.
async fn spawn_counting_version_server(hits: Arc<AtomicUsize>) -> String {
    let app = Router::new().route(
        "/api/version",
        get(move || {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::OK, CT_JSON, version_body())
            }
        }),
    );
    spawn(app).await
}

#[tokio::test]
async fn test_failover_rotates_to_live_endpoint() {
    let hits = Arc::new(AtomicUsize::new(0));
    let live = spawn_counting_version_server(Arc::clone(&hits)).await;

    // Port 1 refuses connections; the dispatcher must rotate.
    let client = SanchayaClient::builder()
        .endpoint("http://127.0.0.1:1")
        .endpoint(&live)
        .build()
        .unwrap();

    client.version().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The live endpoint is now preferred; no more detours through the
    // dead one.
    for _ in 0..3 {
        client.version().await.unwrap();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_all_endpoints_down_is_a_transport_error() {
    let client = SanchayaClient::builder()
        .endpoint("http://127.0.0.1:1")
        .endpoint("http://127.0.0.1:2")
        .build()
        .unwrap();

    let err = client.version().await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_application_errors_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_handler = Arc::clone(&hits);
    let app = Router::new().route(
        "/api/version",
        get(move || {
            let hits = Arc::clone(&hits_handler);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::NOT_FOUND,
                    CT_JSON,
                    json!({"error": true, "code": 404, "errorNum": 1202,
                           "errorMessage": "no such thing"})
                    .to_string(),
                )
            }
        }),
    );
    let url = spawn(app).await;

    let client = SanchayaClient::builder()
        .endpoint(&url)
        .max_attempts(5)
        .build()
        .unwrap();

    let err = client.version().await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(hits.load(Ordering::SeqCst), 1, "4xx must not retry");
}

#[tokio::test]
async fn test_leader_redirect_is_followed() {
    // Leader applies writes.
    let leader_hits = Arc::new(AtomicUsize::new(0));
    let leader_hits_handler = Arc::clone(&leader_hits);
    let leader_app = Router::new().route(
        "/api/config/write",
        post(move || {
            let hits = Arc::clone(&leader_hits_handler);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::OK, CT_JSON, json!({"applied": true}).to_string())
            }
        }),
    );
    let leader = spawn(leader_app).await;

    // Follower forwards to the leader.
    let location = format!("{leader}/api/config/write");
    let follower_app = Router::new().route(
        "/api/config/write",
        post(move || {
            let location = location.clone();
            async move {
                (
                    StatusCode::TEMPORARY_REDIRECT,
                    [(header::LOCATION, location)],
                    String::new(),
                )
            }
        }),
    );
    let follower = spawn(follower_app).await;

    let client = SanchayaClient::builder().endpoint(&follower).build().unwrap();
    let applied = client
        .config_store()
        .write(WriteTransaction::new().set("jobs/cursor", json!(42)))
        .await
        .unwrap();

    assert!(applied);
    assert_eq!(leader_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_config_write_precondition_failure_reports_false() {
    let app = Router::new().route(
        "/api/config/write",
        post(|| async {
            (
                StatusCode::PRECONDITION_FAILED,
                CT_JSON,
                json!({"error": true, "code": 412, "errorNum": 1465,
                       "errorMessage": "precondition failed"})
                .to_string(),
            )
        }),
    );
    let url = spawn(app).await;

    let client = SanchayaClient::builder().endpoint(&url).build().unwrap();
    let applied = client
        .config_store()
        .write(
            WriteTransaction::new()
                .set("locks/job", json!({"owner": "me"}))
                .old_empty("locks/job"),
        )
        .await
        .unwrap();
    assert!(!applied);
}

/// Overloaded node signalling the requested queue-time bound was exceeded.
async fn spawn_backpressured_server(saw_queue_header: Arc<AtomicUsize>) -> String {
    let app = Router::new().route(
        "/api/version",
        get(move |headers: HeaderMap| {
            let saw = Arc::clone(&saw_queue_header);
            async move {
                if headers.contains_key("x-sanchaya-queue-time-seconds") {
                    saw.fetch_add(1, Ordering::SeqCst);
                }
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    CT_JSON,
                    json!({"error": true, "code": 503, "errorNum": 21004,
                           "errorMessage": "queue time violated"})
                    .to_string(),
                )
            }
        }),
    );
    spawn(app).await
}

#[tokio::test]
async fn test_queue_backpressure_rotates_when_requested() {
    let saw_header = Arc::new(AtomicUsize::new(0));
    let busy = spawn_backpressured_server(Arc::clone(&saw_header)).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let healthy = spawn_counting_version_server(Arc::clone(&hits)).await;

    let client = SanchayaClient::builder()
        .endpoint(&busy)
        .endpoint(&healthy)
        .queue_timeout(Duration::from_millis(500))
        .build()
        .unwrap();

    client.version().await.unwrap();
    assert!(saw_header.load(Ordering::SeqCst) >= 1, "queue header sent");
    assert_eq!(hits.load(Ordering::SeqCst), 1, "rotated to healthy node");
}

#[tokio::test]
async fn test_queue_backpressure_is_fatal_when_not_requested() {
    let saw_header = Arc::new(AtomicUsize::new(0));
    let busy = spawn_backpressured_server(Arc::clone(&saw_header)).await;

    let client = SanchayaClient::builder().endpoint(&busy).build().unwrap();
    let err = client.version().await.unwrap_err();
    assert!(err.is_queue_time_violated());
    assert_eq!(saw_header.load(Ordering::SeqCst), 0, "no queue header sent");
}

#[tokio::test]
async fn test_jwt_login_and_reactive_renewal() {
    let logins = Arc::new(AtomicUsize::new(0));
    let logins_handler = Arc::clone(&logins);
    let expires = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3600;

    let app = Router::new()
        .route(
            "/api/auth",
            post(move |body: String| {
                let logins = Arc::clone(&logins_handler);
                async move {
                    let credentials: serde_json::Value = serde_json::from_str(&body).unwrap();
                    assert_eq!(credentials["username"], json!("root"));
                    let n = logins.fetch_add(1, Ordering::SeqCst) + 1;
                    (
                        StatusCode::OK,
                        CT_JSON,
                        json!({"jwt": format!("t{n}"), "expiresAt": expires}).to_string(),
                    )
                }
            }),
        )
        .route(
            "/api/version",
            get(|headers: HeaderMap| async move {
                let token = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if token == "Bearer t1" {
                    // First session token: report it expired.
                    (
                        StatusCode::UNAUTHORIZED,
                        CT_JSON,
                        json!({"error": true, "code": 401, "errorNum": 1106,
                               "errorMessage": "token expired"})
                        .to_string(),
                    )
                } else {
                    (StatusCode::OK, CT_JSON, version_body())
                }
            }),
        );
    let url = spawn(app).await;

    let client = SanchayaClient::builder()
        .endpoint(&url)
        .authentication(Authentication::Jwt {
            username: "root".to_string(),
            password: "open".to_string(),
        })
        .build()
        .unwrap();

    // Login, rejected once, renewed exactly once, then served.
    client.version().await.unwrap();
    assert_eq!(logins.load(Ordering::SeqCst), 2);

    // The renewed token is cached.
    client.version().await.unwrap();
    assert_eq!(logins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_expired_deadline_cancels_without_io() {
    let hits = Arc::new(AtomicUsize::new(0));
    let live = spawn_counting_version_server(Arc::clone(&hits)).await;
    let client = SanchayaClient::builder().endpoint(&live).build().unwrap();

    let request = Request::new(Method::GET, ["api", "version"])
        .deadline(Instant::now() - Duration::from_millis(1));
    let err = client.execute(request).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(hits.load(Ordering::SeqCst), 0, "no network I/O attempted");
}

#[tokio::test]
async fn test_in_flight_deadline_aborts_promptly() {
    let app = Router::new().route(
        "/api/version",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            (StatusCode::OK, CT_JSON, version_body())
        }),
    );
    let url = spawn(app).await;
    let client = SanchayaClient::builder().endpoint(&url).build().unwrap();

    let started = Instant::now();
    let request = Request::new(Method::GET, ["api", "version"])
        .deadline(Instant::now() + Duration::from_millis(150));
    let err = client.execute(request).await.unwrap_err();

    assert!(err.is_cancelled(), "got {err:?}");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "cancellation must unblock promptly"
    );
}

#[tokio::test]
async fn test_database_affinity_pins_calls_to_one_node() {
    let hits_a = Arc::new(AtomicUsize::new(0));
    let hits_b = Arc::new(AtomicUsize::new(0));

    async fn doc_server(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/api/db/:db/document/:coll",
            post(move || {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::CREATED,
                        CT_JSON,
                        json!({"_id": "c/k", "_key": "k", "_rev": "_r1"}).to_string(),
                    )
                }
            }),
        );
        spawn(app).await
    }

    let a = doc_server(Arc::clone(&hits_a)).await;
    let b = doc_server(Arc::clone(&hits_b)).await;

    let client = SanchayaClient::builder()
        .endpoints([a, b])
        .routing(RoutingPolicy::DatabaseAffinity)
        .build()
        .unwrap();

    let collection = client.database("inventory").collection("c");
    for _ in 0..4 {
        collection
            .create_document(&json!({"x": 1}), &Default::default())
            .await
            .unwrap();
    }

    let (a_count, b_count) = (
        hits_a.load(Ordering::SeqCst),
        hits_b.load(Ordering::SeqCst),
    );
    assert_eq!(a_count + b_count, 4);
    assert!(
        a_count == 0 || b_count == 0,
        "all calls for one database must pin to one node (a={a_count}, b={b_count})"
    );
}

#[tokio::test]
async fn test_topology_synchronization_updates_resolver() {
    let follower = spawn(Router::new()).await;
    let app = Router::new().route(
        "/api/cluster/endpoints",
        get(move || {
            let follower = follower.clone();
            async move {
                (
                    StatusCode::OK,
                    CT_JSON,
                    json!({"endpoints": [{"endpoint": follower}]}).to_string(),
                )
            }
        }),
    );
    let seed = spawn(app).await;

    let client = SanchayaClient::builder().endpoint(&seed).build().unwrap();
    assert_eq!(client.endpoints().len(), 1);

    let count = client.synchronize_endpoints().await.unwrap();
    assert_eq!(count, 1);
    assert_ne!(client.endpoints()[0].as_str(), seed.trim_end_matches('/'));
}
