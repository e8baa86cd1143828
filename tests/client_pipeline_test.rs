//! Request pipeline behaviour against a mock backend.

use std::sync::Arc;
use std::time::Duration;

use campus_client::clock::ManualClock;
use campus_client::network::ManualNetworkStatus;
use campus_client::offline_queue::{QueueEvent, ReplayState};
use campus_client::{ApiClient, ClientConfig, ErrorCode, RequestSpec};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn test_config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::default().with_base_url(format!("{}/api", server.uri()));
    config.retry_delay_ms = 10;
    config.max_retry_delay_ms = 50;
    config
}

fn client_with(
    config: ClientConfig,
    clock: &ManualClock,
    network: &Arc<ManualNetworkStatus>,
) -> ApiClient {
    ApiClient::builder(config)
        .clock(Arc::new(clock.clone()))
        .network(network.clone())
        .build()
        .unwrap()
}

fn signed_in_client(server: &MockServer) -> (ApiClient, ManualClock, Arc<ManualNetworkStatus>) {
    let clock = ManualClock::default();
    let network = Arc::new(ManualNetworkStatus::online());
    let client = client_with(test_config(server), &clock, &network);
    client.set_auth_token("tok", Some("r1".to_string()), Some(Duration::from_secs(3600)));
    (client, clock, network)
}

fn students() -> serde_json::Value {
    json!({"success": true, "data": [{"id": 1, "name": "Ada"}]})
}

#[tokio::test]
async fn test_cached_read_expires_after_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(200).set_body_json(students()))
        .expect(2)
        .mount(&server)
        .await;
    let (client, clock, _) = signed_in_client(&server);

    let first = client.get("/students").await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.data, Some(json!([{"id": 1, "name": "Ada"}])));

    clock.advance(Duration::from_secs(200));
    let second = client.get("/students").await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.data, first.data);

    clock.advance(Duration::from_secs(110));
    let third = client.get("/students").await.unwrap();
    assert!(!third.from_cache);
}

#[tokio::test]
async fn test_write_invalidates_cached_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(200).set_body_json(students()))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 2})))
        .expect(1)
        .mount(&server)
        .await;
    let (client, _, _) = signed_in_client(&server);

    client.get("/students").await.unwrap();
    client.post("/students", &json!({"name": "Grace"})).await.unwrap();
    let after = client.get("/students").await.unwrap();
    assert!(!after.from_cache);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"accessToken": "fresh", "refreshToken": "r2", "expiresIn": 3600}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(students()))
        .expect(5)
        .mount(&server)
        .await;

    let clock = ManualClock::default();
    let network = Arc::new(ManualNetworkStatus::online());
    let client = client_with(test_config(&server), &clock, &network);
    // already inside the expiry skew
    client.set_auth_token("stale", Some("r1".to_string()), Some(Duration::from_secs(5)));

    let calls = (0..5).map(|_| client.request("/students", RequestSpec::get().no_cache()));
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(client.auth_state().access_token.as_deref(), Some("fresh"));
    assert_eq!(client.auth_state().refresh_token.as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_and_request_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "expired"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"accessToken": "tok2"}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"code": "CS101"}])))
        .expect(1)
        .mount(&server)
        .await;
    let (client, _, _) = signed_in_client(&server);

    let response = client.get("/courses").await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.data, Some(json!([{"code": "CS101"}])));
}

#[tokio::test]
async fn test_server_errors_are_retried_up_to_the_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;
    let (client, _, _) = signed_in_client(&server);

    let error = client.get("/students").await.unwrap_err();
    assert_eq!(error.code, ErrorCode::ServerError);
    assert_eq!(error.status, 503);
    assert_eq!(error.path, "/students");
}

#[tokio::test]
async fn test_validation_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/students"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"message": "email is required"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (client, _, _) = signed_in_client(&server);

    let error = client.post("/students", &json!({"name": "Ada"})).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::ValidationError);
    assert_eq!(error.message, "email is required");
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/reports"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let (client, _, _) = signed_in_client(&server);

    let spec = RequestSpec::get()
        .timeout(Duration::from_millis(50))
        .no_retry();
    let error = client.request("/reports", spec).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::TimeoutError);
}

#[tokio::test]
async fn test_missing_tokens_fail_without_network_traffic() {
    let server = MockServer::start().await;
    let clock = ManualClock::default();
    let network = Arc::new(ManualNetworkStatus::online());
    let client = client_with(test_config(&server), &clock, &network);

    let error = client.get("/students").await.unwrap_err();
    assert_eq!(error.code, ErrorCode::AuthenticationError);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_login_stores_tokens_for_later_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"accessToken": "a1", "refreshToken": "r1", "expiresIn": 3600}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(students()))
        .expect(1)
        .mount(&server)
        .await;
    let clock = ManualClock::default();
    let network = Arc::new(ManualNetworkStatus::online());
    let client = client_with(test_config(&server), &clock, &network);

    let state = client
        .login(&json!({"email": "admin@campus.edu", "password": "secret"}))
        .await
        .unwrap();
    assert_eq!(state.access_token.as_deref(), Some("a1"));
    assert!(client.is_authenticated());

    client.get("/students").await.unwrap();
}

#[tokio::test]
async fn test_in_flight_request_keeps_its_program_context() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/enrollments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(2)
        .mount(&server)
        .await;
    let (client, _, _) = signed_in_client(&server);
    client.set_program_context("prog-1", "Nursing");

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.get("/enrollments").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.set_program_context("prog-2", "Law");
    client.get("/enrollments").await.unwrap();
    first.await.unwrap().unwrap();

    let received = server.received_requests().await.unwrap();
    let contexts: Vec<String> = received
        .iter()
        .map(|request| {
            request
                .headers
                .get("x-program-context")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    assert_eq!(contexts, vec!["prog-1".to_string(), "prog-2".to_string()]);
}

#[tokio::test]
async fn test_offline_writes_replay_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/courses"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "bad course"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/grades"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 3})))
        .expect(1)
        .mount(&server)
        .await;

    let clock = ManualClock::default();
    let network = Arc::new(ManualNetworkStatus::offline());
    let client = client_with(test_config(&server), &clock, &network);
    client.set_auth_token("tok", None, Some(Duration::from_secs(3600)));

    for resource in ["/students", "/courses", "/grades"] {
        let response = client.post(resource, &json!({"resource": resource})).await.unwrap();
        assert!(response.queued.is_some());
    }
    assert_eq!(client.pending_requests().len(), 3);
    assert!(client.flush_offline_queue().await.is_empty());

    network.set_online(true);
    let reports = client.flush_offline_queue().await;
    let states: Vec<ReplayState> = reports.iter().map(|report| report.state).collect();
    assert_eq!(
        states,
        vec![
            ReplayState::Succeeded,
            ReplayState::FailedPermanent,
            ReplayState::Succeeded
        ]
    );
    assert!(client.pending_requests().is_empty());

    let order: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.url.path().to_string())
        .collect();
    assert_eq!(order, vec!["/api/v1/students", "/api/v1/courses", "/api/v1/grades"]);
}

#[tokio::test]
async fn test_queue_flushes_when_connectivity_returns() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/students/7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let clock = ManualClock::default();
    let network = Arc::new(ManualNetworkStatus::offline());
    let client = client_with(test_config(&server), &clock, &network);
    client.set_auth_token("tok", None, Some(Duration::from_secs(3600)));
    let mut events = client.subscribe_queue_events();

    client.delete("/students/7").await.unwrap();
    client.start_offline_sync();
    network.set_online(true);

    let flushed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Flushed {
                    succeeded,
                    failed,
                    remaining,
                }) => return (succeeded, failed, remaining),
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(flushed, (1, 0, 0));
    assert!(client.pending_requests().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn test_read_started_before_a_write_is_not_cached_after_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!(["old"]))
                .set_delay(Duration::from_millis(300)),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["new"])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 2})))
        .expect(1)
        .mount(&server)
        .await;
    let (client, _, _) = signed_in_client(&server);

    let slow_read = tokio::spawn({
        let client = client.clone();
        async move { client.get("/students").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.post("/students", &json!({"name": "Grace"})).await.unwrap();
    let stale = slow_read.await.unwrap().unwrap();
    assert_eq!(stale.data, Some(json!(["old"])));

    let after = client.get("/students").await.unwrap();
    assert!(!after.from_cache);
    assert_eq!(after.data, Some(json!(["new"])));
}

#[tokio::test]
async fn test_write_leaves_sibling_collections_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students-archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/students/4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 4})))
        .expect(1)
        .mount(&server)
        .await;
    let (client, _, _) = signed_in_client(&server);

    client.get("/students-archive").await.unwrap();
    client.put("/students/4", &json!({"name": "Ada"})).await.unwrap();
    assert!(client.get("/students-archive").await.unwrap().from_cache);
}

#[tokio::test]
async fn test_rejected_refresh_ends_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["CS101"])))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/students"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "refresh token revoked"})))
        .expect(1)
        .mount(&server)
        .await;
    let (client, _, _) = signed_in_client(&server);

    let public = || client.request("/catalog", RequestSpec::get().skip_auth());
    public().await.unwrap();
    assert!(public().await.unwrap().from_cache);

    let error = client.get("/students").await.unwrap_err();
    assert_eq!(error.code, ErrorCode::AuthenticationError);
    assert_eq!(error.path, "/students");
    assert!(!client.is_authenticated());
    assert_eq!(client.auth_state().refresh_token, None);

    // the previous session's cached reads are gone
    assert!(!public().await.unwrap().from_cache);
}

/// Accepts the request, then reports the link as down.
struct DropLinkAfterResponse(Arc<ManualNetworkStatus>);

impl Respond for DropLinkAfterResponse {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.0.set_online(false);
        ResponseTemplate::new(201).set_body_json(json!({"id": 1}))
    }
}

#[tokio::test]
async fn test_flush_stops_when_connectivity_drops() {
    let server = MockServer::start().await;
    let network = Arc::new(ManualNetworkStatus::offline());
    Mock::given(method("POST"))
        .and(path("/api/v1/students"))
        .respond_with(DropLinkAfterResponse(network.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let clock = ManualClock::default();
    let client = client_with(test_config(&server), &clock, &network);
    client.set_auth_token("tok", None, Some(Duration::from_secs(3600)));
    for resource in ["/students", "/courses", "/grades"] {
        client.post(resource, &json!({})).await.unwrap();
    }

    network.set_online(true);
    let reports = client.flush_offline_queue().await;
    let states: Vec<(ReplayState, u32)> = reports
        .iter()
        .map(|report| (report.state, report.retry_count))
        .collect();
    assert_eq!(
        states,
        vec![
            (ReplayState::Succeeded, 0),
            (ReplayState::Queued, 0),
            (ReplayState::Queued, 0)
        ]
    );

    let pending = client.pending_requests();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|entry| entry.retry_count == 0));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
