//! End-to-end exercises of the connection fabric against an in-process plain-TCP mock broker.

mod common;

use serde_json::json;
use xwrpr_core::keepalive::PingTarget;
use xwrpr_core::session::{Mode, Session};
use xwrpr_core::stream_session::StreamSession;
use xwrpr_core::wire::StreamCommand;
use xwrpr_core::{Error, PoolManager};

use common::{accept_and_login, bind_loopback, test_config, test_credentials, MockConn};

#[tokio::test]
async fn single_request_round_trips_through_the_data_channel() {
    let (data_listener, host, data_port) = bind_loopback().await;
    let (_stream_listener, _, stream_port) = bind_loopback().await;

    let broker = tokio::spawn(async move {
        let mut conn = accept_and_login(&data_listener, "ssid-1").await;
        let request = conn.recv_json().await;
        assert_eq!(request["command"], "getVersion");
        conn.send_json(&json!({"status": true, "returnData": {"version": "2.5.0"}}))
            .await;
        conn
    });

    let config = test_config(&host, data_port, stream_port);
    let session = Session::open(Mode::Demo, test_credentials(), &config)
        .await
        .unwrap();

    let reply = session.request("getVersion", None, None).await.unwrap();
    assert_eq!(reply.return_data.unwrap()["version"], "2.5.0");

    broker.await.unwrap();
}

#[tokio::test]
async fn stream_subscription_receives_ticks_until_unsubscribed() {
    let (data_listener, host, data_port) = bind_loopback().await;
    let (stream_listener, _, stream_port) = bind_loopback().await;

    let broker = tokio::spawn(async move {
        let _data = accept_and_login(&data_listener, "ssid-2").await;
        let mut stream = MockConn::accept(&stream_listener).await;

        let keep_alive = stream.recv_json().await;
        assert_eq!(keep_alive["command"], "getKeepAlive");

        let subscribe = stream.recv_json().await;
        assert_eq!(subscribe["command"], "getTickPrices");
        assert_eq!(subscribe["arguments"]["symbol"], "EURUSD");

        stream
            .send_json(&json!({"command": "tickPrices", "data": {"symbol": "EURUSD", "ask": 1.1}}))
            .await;

        let unsubscribe = stream.recv_json().await;
        assert_eq!(unsubscribe["command"], "stopTickPrices");
        assert_eq!(unsubscribe["arguments"]["symbol"], "EURUSD");
        stream
    });

    let config = test_config(&host, data_port, stream_port);
    let session = Session::open(Mode::Demo, test_credentials(), &config)
        .await
        .unwrap();
    let stream_session = StreamSession::open(&session, &config).await.unwrap();

    let queue = stream_session
        .subscribe(
            StreamCommand::TickPrices,
            Some("EURUSD".to_owned()),
            json!({"symbol": "EURUSD"}),
        )
        .await
        .unwrap();

    let tick = queue.recv().await;
    assert_eq!(tick["symbol"], "EURUSD");

    stream_session
        .unsubscribe(StreamCommand::TickPrices, Some("EURUSD".to_owned()))
        .await
        .unwrap();

    broker.await.unwrap();
}

#[tokio::test]
async fn reconnect_replays_subscriptions_in_registration_order() {
    let (data_listener, host, data_port) = bind_loopback().await;
    let (stream_listener, _, stream_port) = bind_loopback().await;

    let broker = tokio::spawn(async move {
        let _data_first = accept_and_login(&data_listener, "ssid-a").await;
        let mut stream_first = MockConn::accept(&stream_listener).await;

        let keep_alive = stream_first.recv_json().await;
        assert_eq!(keep_alive["command"], "getKeepAlive");
        let subscribe = stream_first.recv_json().await;
        assert_eq!(subscribe["command"], "getTickPrices");

        // Sever the stream socket out from under the client to force a reconnect of just the
        // Stream Session; the Data Session's own socket is untouched and stays healthy.
        stream_first.close().await;

        let mut stream_second = MockConn::accept(&stream_listener).await;

        // Replay must resubscribe KeepAlive before the user's TickPrices subscription, in the
        // order they were originally registered, against the Data Session's unchanged ssid.
        let replay_keep_alive = stream_second.recv_json().await;
        assert_eq!(replay_keep_alive["command"], "getKeepAlive");
        let replay_subscribe = stream_second.recv_json().await;
        assert_eq!(replay_subscribe["command"], "getTickPrices");
        assert_eq!(replay_subscribe["arguments"]["symbol"], "EURUSD");
        assert_eq!(replay_subscribe["streamSessionId"], "ssid-a");

        stream_second
            .send_json(&json!({"command": "tickPrices", "data": {"symbol": "EURUSD", "ask": 1.2}}))
            .await;
    });

    let config = test_config(&host, data_port, stream_port);
    let session = Session::open(Mode::Demo, test_credentials(), &config)
        .await
        .unwrap();
    let stream_session = StreamSession::open(&session, &config).await.unwrap();

    let queue = stream_session
        .subscribe(
            StreamCommand::TickPrices,
            Some("EURUSD".to_owned()),
            json!({"symbol": "EURUSD"}),
        )
        .await
        .unwrap();

    // The peer closes the stream socket. Wait for the dispatcher to notice, then drive the same
    // ping-failure-triggers-reconnect path the keepalive supervisor uses in production (whose
    // real interval is minutes long, too slow for a test's timeout budget).
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let ping_result = PingTarget::ping(&*stream_session).await;
    assert!(ping_result.is_err());
    stream_session.reconnect().await.unwrap();

    let tick = queue.recv().await;
    assert_eq!(tick["ask"], 1.2);

    broker.await.unwrap();
}

#[tokio::test]
async fn rejected_login_surfaces_as_request_rejected() {
    let (data_listener, host, data_port) = bind_loopback().await;
    let (_stream_listener, _, stream_port) = bind_loopback().await;

    let broker = tokio::spawn(async move {
        let mut conn = MockConn::accept(&data_listener).await;
        let login = conn.recv_json().await;
        assert_eq!(login["command"], "login");
        conn.send_json(&json!({
            "status": false,
            "errorCode": "BE005",
            "errorDescr": "invalid login or password",
        }))
        .await;
    });

    let config = test_config(&host, data_port, stream_port);
    let error = Session::open(Mode::Demo, test_credentials(), &config)
        .await
        .unwrap_err();

    match error {
        Error::RequestRejected { error_code, .. } => assert_eq!(error_code, "BE005"),
        other => panic!("expected RequestRejected, got {other:?}"),
    }

    broker.await.unwrap();
}

#[tokio::test]
async fn pool_manager_rejects_new_connections_past_the_cap() {
    let (data_listener_demo, host, data_port_demo) = bind_loopback().await;
    let (_stream_listener_demo, _, stream_port_demo) = bind_loopback().await;
    let (data_listener_real, _, data_port_real) = bind_loopback().await;
    let (_stream_listener_real, _, stream_port_real) = bind_loopback().await;

    let broker = tokio::spawn(async move {
        let _demo = accept_and_login(&data_listener_demo, "ssid-demo").await;
        let _real = accept_and_login(&data_listener_real, "ssid-real").await;
    });

    let mut config = test_config(&host, data_port_demo, stream_port_demo);
    config.socket.port_real = data_port_real;
    config.socket.port_real_stream = stream_port_real;
    config.connection.max_connections = 2;

    let pool = PoolManager::new(config);

    let demo = pool
        .provide_session(Mode::Demo, test_credentials())
        .await
        .unwrap();
    assert!(demo.is_active().await);

    let real = pool
        .provide_session(Mode::Real, test_credentials())
        .await
        .unwrap();
    assert!(real.is_active().await);

    // Both Sessions are reused as-is by a second `provide_session` call of the same mode, since
    // neither creates a new connection.
    let demo_again = pool
        .provide_session(Mode::Demo, test_credentials())
        .await
        .unwrap();
    assert!(demo_again.is_active().await);

    // A Stream Session always needs a fresh connection of its own, so this is the third
    // connection against a cap of two, and must be rejected.
    let error = pool
        .provide_stream_session(Mode::Demo, test_credentials())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::CapacityExhausted(_)));

    pool.delete_all().await;
    broker.await.unwrap();
}
