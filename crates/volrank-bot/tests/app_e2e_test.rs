//! Application startup, ranking and shutdown against mock REST and stream
//! servers.

mod integration;
use integration::common::mock_ws::MockWsServer;

use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::timeout;
use volrank_bot::{AppConfig, AppError, Application};
use volrank_rest::Credentials;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const STREAM_PATH: &str = "/api/v3/userDataStream";

/// Fails every request and remembers when the last one arrived.
#[derive(Clone, Default)]
struct FailingDelete {
    received_at: Arc<Mutex<Option<Instant>>>,
}

impl Respond for FailingDelete {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        *self.received_at.lock() = Some(Instant::now());
        ResponseTemplate::new(500).set_body_string("internal error")
    }
}

async fn mount_account(rest: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "canTrade": true,
            "updateTime": 0,
            "balances": []
        })))
        .mount(rest)
        .await;
}

async fn mount_snapshot(rest: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "symbol": "AUSDT", "volume": "100" },
            { "symbol": "BUSDT", "volume": "90" },
            { "symbol": "CUSDT", "volume": "80" }
        ])))
        .mount(rest)
        .await;
}

async fn mount_account_and_session(rest: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "canTrade": true,
            "updateTime": 0,
            "balances": [
                { "asset": "BTC", "free": "1.5", "locked": "0.0" },
                { "asset": "XRP", "free": "0.0", "locked": "0.0" }
            ]
        })))
        .mount(rest)
        .await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "listenKey": "lk" })))
        .expect(1)
        .mount(rest)
        .await;
    Mock::given(method("DELETE"))
        .and(path(STREAM_PATH))
        .and(query_param("listenKey", "lk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(rest)
        .await;
}

fn config_for(rest: &MockServer, ws: &MockWsServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.endpoints.account_api_url = rest.uri();
    config.endpoints.market_api_url = rest.uri();
    config.endpoints.account_ws_url = ws.url();
    config.endpoints.market_ws_url = ws.url();
    config.ranking.top_n = 2;
    config
}

#[tokio::test]
async fn test_rank_change_moves_trade_stream() {
    let rest = MockServer::start().await;
    mount_account_and_session(&rest).await;
    mount_snapshot(&rest).await;

    let mut script = HashMap::new();
    script.insert(
        "!miniTicker@arr".to_string(),
        vec![json!([{ "e": "24hrMiniTicker", "E": 1, "s": "CUSDT", "c": "1.0", "v": "200" }]).to_string()],
    );
    script.insert(
        "cusdt@trade".to_string(),
        vec![json!({
            "e": "trade", "E": 1, "s": "CUSDT", "t": 7,
            "p": "1.0", "q": "2.0", "T": 1, "m": false
        })
        .to_string()],
    );
    let ws = MockWsServer::with_script(script).await;

    let app = Application::new(config_for(&rest, &ws), Credentials::new("key", "secret")).unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(app.run_until(async {
        let _ = stop_rx.await;
    }));

    let settled = timeout(Duration::from_secs(5), async {
        loop {
            let done = ws.connection_count().await >= 4
                && !ws.control_frames("SUBSCRIBE", "ausdt@trade").await.is_empty()
                && !ws.control_frames("SUBSCRIBE", "!miniTicker@arr").await.is_empty()
                && !ws.control_frames("SUBSCRIBE", "cusdt@trade").await.is_empty();
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "streams never reached the migrated top-2");

    // User stream, two trade streams and the ticker stream; migration
    // opened nothing new.
    assert_eq!(ws.connection_count().await, 4);

    stop_tx.send(()).unwrap();
    let result = timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    assert!(result.is_ok());

    ws.shutdown().await;
    // Dropping `rest` verifies the session was created and deleted once.
}

#[tokio::test]
async fn test_snapshot_failure_is_fatal_and_cleans_up() {
    let rest = MockServer::start().await;
    mount_account_and_session(&rest).await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&rest)
        .await;
    let ws = MockWsServer::start().await;

    let app = Application::new(config_for(&rest, &ws), Credentials::new("key", "secret")).unwrap();
    let result = timeout(
        Duration::from_secs(10),
        app.run_until(std::future::pending::<()>()),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(AppError::Startup(_))));
    ws.shutdown().await;
}

#[tokio::test]
async fn test_session_failure_is_fatal() {
    let rest = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": -2015,
            "msg": "Invalid API-key, IP, or permissions for action."
        })))
        .mount(&rest)
        .await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": -2015,
            "msg": "Invalid API-key, IP, or permissions for action."
        })))
        .mount(&rest)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&rest)
        .await;
    let ws = MockWsServer::start().await;

    let app = Application::new(config_for(&rest, &ws), Credentials::new("key", "secret")).unwrap();
    let result = timeout(
        Duration::from_secs(10),
        app.run_until(std::future::pending::<()>()),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(AppError::Startup(_))));
    assert_eq!(ws.connection_count().await, 0);
    ws.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_order_survives_failed_delete() {
    let rest = MockServer::start().await;
    mount_account(&rest).await;
    mount_snapshot(&rest).await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "listenKey": "lk" })))
        .mount(&rest)
        .await;
    let delete = FailingDelete::default();
    Mock::given(method("DELETE"))
        .and(path(STREAM_PATH))
        .and(query_param("listenKey", "lk"))
        .respond_with(delete.clone())
        .expect(1)
        .mount(&rest)
        .await;
    let ws = MockWsServer::start().await;

    let app = Application::new(config_for(&rest, &ws), Credentials::new("key", "secret")).unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(app.run_until(async {
        let _ = stop_rx.await;
    }));

    let settled = timeout(Duration::from_secs(5), async {
        loop {
            let done = ws.connection_count().await >= 4
                && !ws.control_frames("SUBSCRIBE", "ausdt@trade").await.is_empty()
                && !ws.control_frames("SUBSCRIBE", "busdt@trade").await.is_empty()
                && !ws.control_frames("SUBSCRIBE", "!miniTicker@arr").await.is_empty();
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "streams never opened");

    stop_tx.send(()).unwrap();
    let result = timeout(Duration::from_secs(10), handle).await.unwrap().unwrap();
    assert!(result.is_ok());

    let all_closed = timeout(Duration::from_secs(2), async {
        while ws.closed_connections().await.len() < 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(all_closed.is_ok(), "not every stream closed");

    let deleted_at = (*delete.received_at.lock()).expect("session delete was never sent");
    let user_closed = ws.closed_at("/ws/lk").await.unwrap();
    assert!(user_closed < deleted_at, "user stream closed after the delete");

    // The failed delete does not stop the market streams from closing.
    for stream in ["!miniTicker@arr", "ausdt@trade", "busdt@trade"] {
        let closed = ws.closed_at(stream).await.unwrap();
        assert!(closed > deleted_at, "{stream} closed before the delete");
    }

    ws.shutdown().await;
}
