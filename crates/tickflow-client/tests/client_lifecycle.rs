//! End-to-end client tests against a mock feed server.

mod common;

use std::time::Duration;

use common::MockFeedServer;
use rust_decimal_macros::dec;
use tickflow_client::{Client, ConnectOptions};
use tickflow_core::{Config, CoreError, Outgoing, Validator};

fn config_for(server: &MockFeedServer) -> Config {
    let config = Config::new();
    config.set_urls(vec![server.url()]).unwrap();
    config.set_connection_initialization_timeout_secs(5).unwrap();
    config.set_timeout_secs(5).unwrap();
    config
}

#[tokio::test]
async fn connects_authenticates_and_locks_the_config() {
    let server = MockFeedServer::start(Vec::new()).await;
    let client = Client::connect(
        config_for(&server),
        ConnectOptions {
            auth_message: Some(r#"42["auth",{"session":"opaque"}]"#.to_string()),
            demo: true,
        },
    )
    .await
    .unwrap();

    assert!(client.is_demo());
    // The config is locked for good once a live client was built.
    assert!(matches!(
        client.config().set_timeout_secs(1),
        Err(CoreError::Config(_))
    ));

    // The auth frame went out after the namespace ack.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count().await, 1);
    let received = server.received_messages().await;
    assert!(received.iter().any(|m| m == "40"));
    assert!(received.iter().any(|m| m.contains(r#"42["auth""#)));

    client.disconnect();
    server.shutdown().await;
}

#[tokio::test]
async fn connect_fails_within_timeout_when_no_server_listens() {
    let config = Config::new();
    config.set_urls(vec!["ws://127.0.0.1:1".to_string()]).unwrap();
    config.set_connection_initialization_timeout_secs(1).unwrap();

    let result = Client::connect(config, ConnectOptions::default()).await;
    assert!(matches!(result, Err(CoreError::Connection(_))));
}

#[tokio::test]
async fn raw_handler_request_response_round_trip() {
    let server = MockFeedServer::start(vec![(
        "ping".to_string(),
        r#"42["pong",{"ok":true}]"#.to_string(),
    )])
    .await;
    let client = Client::connect(config_for(&server), ConnectOptions::default())
        .await
        .unwrap();

    let handler = client.create_handler(Validator::contains("pong"), None);
    let response = handler
        .send_and_wait(Outgoing::text(r#"42["ping"]"#))
        .await
        .unwrap();
    assert!(response.contains("\"ok\":true"));

    server.shutdown().await;
}

#[tokio::test]
async fn tick_subscription_streams_pushed_updates() {
    let server = MockFeedServer::start(Vec::new()).await;
    let client = Client::connect(config_for(&server), ConnectOptions::default())
        .await
        .unwrap();

    let mut ticks = client.subscribe_symbol("EURUSD_otc").await.unwrap();
    server.push(r#"42["updateStream",[["EURUSD_otc",1700000000,1.0625]]]"#);
    server.push(r#"42["updateStream",[["EURUSD_otc",1700000001,1.0630]]]"#);

    let first = ticks.next().await.unwrap().unwrap();
    assert_eq!(first.asset, "EURUSD_otc");
    assert_eq!(first.price, 1.0625);
    let second = ticks.next().await.unwrap().unwrap();
    assert_eq!(second.price, 1.0630);

    // Tick timestamps drive the server clock estimate.
    let estimated = client.server_time();
    assert!((estimated - 1_700_000_001).abs() <= 2);

    server.shutdown().await;
}

#[tokio::test]
async fn chunked_subscription_builds_candles_from_pushed_ticks() {
    let server = MockFeedServer::start(Vec::new()).await;
    let client = Client::connect(config_for(&server), ConnectOptions::default())
        .await
        .unwrap();

    let mut candles = client
        .subscribe_symbol_chunked("EURUSD_otc", 2)
        .await
        .unwrap();
    server.push(r#"42["updateStream",[["EURUSD_otc",100,1.0]]]"#);
    server.push(r#"42["updateStream",[["EURUSD_otc",101,1.2]]]"#);

    let candle = candles.next().await.unwrap().unwrap();
    assert_eq!(candle.open, dec!(1.0));
    assert_eq!(candle.close, dec!(1.2));
    assert_eq!(candle.tick_count, 2);

    server.shutdown().await;
}

#[tokio::test]
async fn get_candles_round_trip() {
    let server = MockFeedServer::start(vec![(
        "changeSymbol".to_string(),
        r#"42["loadHistoryPeriod",{"asset":"EURUSD_otc","period":60,"history":[[100,1.0],[101,1.1],[159,1.2],[160,2.0]]}]"#
            .to_string(),
    )])
    .await;
    let client = Client::connect(config_for(&server), ConnectOptions::default())
        .await
        .unwrap();

    let candles = client.get_candles("EURUSD_otc", 60, 0).await.unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].bucket_start, 60);
    assert_eq!(candles[0].open, dec!(1.0));
    assert_eq!(candles[0].high, dec!(1.2));
    assert_eq!(candles[1].bucket_start, 120);
    assert_eq!(candles[1].close, dec!(2.0));

    server.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_ends_the_stream_and_notifies_the_server() {
    let server = MockFeedServer::start(Vec::new()).await;
    let client = Client::connect(config_for(&server), ConnectOptions::default())
        .await
        .unwrap();

    let mut ticks = client.subscribe_symbol("EURUSD_otc").await.unwrap();
    client.unsubscribe("EURUSD_otc").await.unwrap();

    assert!(ticks.next().await.is_none());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let received = server.received_messages().await;
    // One unsubfor from the subscribe trio, one from the unsubscribe.
    let unsubs = received
        .iter()
        .filter(|m| *m == r#"42["unsubfor","EURUSD_otc"]"#)
        .count();
    assert_eq!(unsubs, 2);

    server.shutdown().await;
}
