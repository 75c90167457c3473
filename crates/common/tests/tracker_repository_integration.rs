#![cfg(feature = "integration-tests")]

use chrono::{TimeZone, Utc};
use common::domain::{
    DeviceIdentity, Eui64, InsertMessagesInput, Position, QueryMessagesInput, Sequence,
    TelemetryMessage, TrackerRepository, UpsertDevicesInput,
};
use common::postgres::{PostgresClient, PostgresConfig, PostgresTrackerRepository};
use serde_json::json;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

const NAMESPACE: i64 = 3;

async fn setup_test_db() -> (ContainerAsync<Postgres>, PostgresTrackerRepository) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let client = PostgresClient::new(&PostgresConfig {
        host: host.to_string(),
        port,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: "postgres".to_string(),
        max_pool_size: 5,
    })
    .expect("Failed to create client");

    let repo = PostgresTrackerRepository::new(client);
    repo.ensure_schema(NAMESPACE).await.expect("Schema creation failed");

    (postgres, repo)
}

fn device(address: &str) -> DeviceIdentity {
    DeviceIdentity::new(Eui64::parse(address).unwrap(), NAMESPACE)
}

fn message(device_id: i64, second: u32, gps: bool) -> TelemetryMessage {
    let received_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, second).unwrap();
    TelemetryMessage {
        device_id,
        seq: Sequence::from_datetime(received_at),
        envelope: json!({"msgtype": "upinfo", "FCntUp": second}),
        received_at,
        position: if gps {
            Position::new(42.3519, -87.9094)
        } else {
            Position::default()
        },
        accuracy: 0,
        error: if gps { None } else { Some("no gps fix".to_string()) },
        sensors: json!({"temperature_3": 27.2}),
    }
}

#[tokio::test]
async fn test_ensure_schema_is_idempotent() {
    let (_container, repo) = setup_test_db().await;

    repo.ensure_schema(NAMESPACE).await.unwrap();

    assert!(repo.load_device_ids(NAMESPACE).await.unwrap().is_empty());
    assert_eq!(repo.latest_sequence(NAMESPACE).await.unwrap(), None);
}

#[tokio::test]
async fn test_upsert_devices_is_idempotent() {
    // Arrange
    let (_container, repo) = setup_test_db().await;
    let a = device("58-A0-CB-00-00-20-07-B9");
    let b = device("F0-00-00-00-00-00-00-01");

    // Act
    repo.upsert_devices(UpsertDevicesInput {
        namespace: NAMESPACE,
        devices: vec![a.clone(), b.clone()],
    })
    .await
    .unwrap();
    repo.upsert_devices(UpsertDevicesInput {
        namespace: NAMESPACE,
        devices: vec![a.clone()],
    })
    .await
    .unwrap();

    // Assert
    let mut ids = repo.load_device_ids(NAMESPACE).await.unwrap();
    ids.sort();
    let mut expected = vec![a.id(), b.id()];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let (_container, repo) = setup_test_db().await;
    repo.ensure_schema(NAMESPACE + 1).await.unwrap();

    repo.upsert_devices(UpsertDevicesInput {
        namespace: NAMESPACE,
        devices: vec![device("58-A0-CB-00-00-20-07-B9")],
    })
    .await
    .unwrap();

    assert!(repo.load_device_ids(NAMESPACE + 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_insert_and_query_messages() {
    // Arrange
    let (_container, repo) = setup_test_db().await;
    let a = device("58-A0-CB-00-00-20-07-B9").id();
    let b = device("58-A0-CB-00-00-20-07-BA").id();
    let c = device("58-A0-CB-00-00-20-07-BB").id();

    repo.insert_messages(InsertMessagesInput {
        namespace: NAMESPACE,
        messages: vec![
            message(a, 3, true),
            message(b, 1, false),
            message(a, 2, true),
            message(c, 4, true),
            message(a, 50, true),
        ],
    })
    .await
    .unwrap();

    let from = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 10).unwrap();

    // Act
    let rows = repo
        .query_messages(QueryMessagesInput {
            namespace: NAMESPACE,
            device_ids: vec![a, b],
            from: Sequence::from_datetime(from),
            to: Sequence::from_datetime(to),
            limit: 8192,
        })
        .await
        .unwrap();

    // Assert
    let order: Vec<(i64, u32)> = rows
        .iter()
        .map(|m| (m.device_id, m.received_at.timestamp() as u32 % 60))
        .collect();
    assert_eq!(order, vec![(b, 1), (a, 2), (a, 3)]);

    assert_eq!(rows[1], message(a, 2, true));
    assert_eq!(rows[0].error.as_deref(), Some("no gps fix"));
    assert_eq!(rows[0].position, Position::default());
}

#[tokio::test]
async fn test_query_respects_limit() {
    let (_container, repo) = setup_test_db().await;
    let a = device("58-A0-CB-00-00-20-07-B9").id();
    repo.insert_messages(InsertMessagesInput {
        namespace: NAMESPACE,
        messages: (0..5).map(|s| message(a, s, true)).collect(),
    })
    .await
    .unwrap();

    let rows = repo
        .query_messages(QueryMessagesInput {
            namespace: NAMESPACE,
            device_ids: vec![a],
            from: Sequence::new(0),
            to: Sequence::new(i64::MAX),
            limit: 2,
        })
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert!(rows[0].seq < rows[1].seq);
}

#[tokio::test]
async fn test_latest_sequence() {
    let (_container, repo) = setup_test_db().await;
    let a = device("58-A0-CB-00-00-20-07-B9").id();

    repo.insert_messages(InsertMessagesInput {
        namespace: NAMESPACE,
        messages: vec![message(a, 7, true), message(a, 9, false), message(a, 8, true)],
    })
    .await
    .unwrap();

    assert_eq!(
        repo.latest_sequence(NAMESPACE).await.unwrap(),
        Some(message(a, 9, false).seq)
    );
}
