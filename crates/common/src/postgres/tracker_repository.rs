use crate::domain::{
    DomainError, DomainResult, InsertMessagesInput, NamespaceId, Position, QueryMessagesInput,
    Sequence, TelemetryMessage, TrackerRepository, UpsertDevicesInput,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

/// Table names for one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerTables {
    pub device: String,
    pub message: String,
}

impl TrackerTables {
    pub fn for_namespace(namespace: NamespaceId) -> Self {
        // Negative ids are spelled `n<abs>` to keep names valid unquoted identifiers
        let tag = if namespace < 0 {
            format!("n{}", namespace.unsigned_abs())
        } else {
            namespace.to_string()
        };
        Self {
            device: format!("trackers_{}_device", tag),
            message: format!("trackers_{}_message", tag),
        }
    }

    fn create_statement(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {device} (
                 device_id    int8         PRIMARY KEY
             );
             CREATE TABLE IF NOT EXISTS {message} (
                 message_id   BIGSERIAL    PRIMARY KEY,
                 device_id    int8         NOT NULL,
                 seq          int8         NOT NULL,
                 pos          point        NOT NULL,
                 accuracy     int          NOT NULL,
                 sensors      jsonb        NOT NULL,
                 error        text,
                 envelope     jsonb        NOT NULL,
                 received_at  timestamptz  NOT NULL DEFAULT now()
             );
             CREATE INDEX IF NOT EXISTS {message}_device_id_idx ON {message}(device_id);
             CREATE INDEX IF NOT EXISTS {message}_seq_idx ON {message}(seq);
             CREATE INDEX IF NOT EXISTS {message}_received_at_idx ON {message}(received_at);",
            device = self.device,
            message = self.message,
        )
    }
}

/// Message row as read back from PostgreSQL
#[derive(Debug, Clone)]
struct TelemetryMessageRow {
    device_id: i64,
    seq: i64,
    latitude: f64,
    longitude: f64,
    accuracy: i32,
    sensors: serde_json::Value,
    error: Option<String>,
    envelope: serde_json::Value,
    received_at: DateTime<Utc>,
}

impl From<TelemetryMessageRow> for TelemetryMessage {
    fn from(row: TelemetryMessageRow) -> Self {
        TelemetryMessage {
            device_id: row.device_id,
            seq: Sequence::new(row.seq),
            envelope: row.envelope,
            received_at: row.received_at,
            position: Position::new(row.latitude, row.longitude),
            accuracy: u32::try_from(row.accuracy).unwrap_or_default(),
            error: row.error,
            sensors: row.sensors,
        }
    }
}

/// Column-wise arrays for a multi-row `UNNEST` insert
#[derive(Debug, Default)]
struct MessageColumns {
    device_ids: Vec<i64>,
    seqs: Vec<i64>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    accuracies: Vec<i32>,
    sensors: Vec<serde_json::Value>,
    errors: Vec<Option<String>>,
    envelopes: Vec<serde_json::Value>,
    received_at: Vec<DateTime<Utc>>,
}

impl From<Vec<TelemetryMessage>> for MessageColumns {
    fn from(messages: Vec<TelemetryMessage>) -> Self {
        let mut columns = MessageColumns::default();
        for m in messages {
            columns.device_ids.push(m.device_id);
            columns.seqs.push(m.seq.value());
            columns.latitudes.push(m.position.latitude);
            columns.longitudes.push(m.position.longitude);
            columns
                .accuracies
                .push(i32::try_from(m.accuracy).unwrap_or(i32::MAX));
            columns.sensors.push(m.sensors);
            columns.errors.push(m.error);
            columns.envelopes.push(m.envelope);
            columns.received_at.push(m.received_at);
        }
        columns
    }
}

/// PostgreSQL implementation of TrackerRepository trait
#[derive(Clone)]
pub struct PostgresTrackerRepository {
    client: PostgresClient,
}

impl PostgresTrackerRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TrackerRepository for PostgresTrackerRepository {
    #[instrument(skip(self))]
    async fn ensure_schema(&self, namespace: NamespaceId) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let tables = TrackerTables::for_namespace(namespace);
        conn.batch_execute(&tables.create_statement())
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(device_table = %tables.device, message_table = %tables.message, "ensured tracker tables");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_device_ids(&self, namespace: NamespaceId) -> DomainResult<Vec<i64>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let tables = TrackerTables::for_namespace(namespace);
        let rows = conn
            .query(
                format!("SELECT device_id FROM {} ORDER BY device_id", tables.device).as_str(),
                &[],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let ids: Vec<i64> = rows.iter().map(|row| row.get(0)).collect();
        debug!(count = ids.len(), "loaded device ids");
        Ok(ids)
    }

    #[instrument(skip(self, input), fields(namespace = input.namespace, count = input.devices.len()))]
    async fn upsert_devices(&self, input: UpsertDevicesInput) -> DomainResult<()> {
        if input.devices.is_empty() {
            return Ok(());
        }

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let tables = TrackerTables::for_namespace(input.namespace);
        let ids: Vec<i64> = input.devices.iter().map(|d| d.id()).collect();

        let affected = conn
            .execute(
                format!(
                    "INSERT INTO {} (device_id)
                     SELECT * FROM UNNEST($1::int8[])
                     ON CONFLICT (device_id) DO UPDATE SET device_id = EXCLUDED.device_id",
                    tables.device
                )
                .as_str(),
                &[&ids],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(affected, "upserted device identities");
        Ok(())
    }

    #[instrument(skip(self, input), fields(namespace = input.namespace, count = input.messages.len()))]
    async fn insert_messages(&self, input: InsertMessagesInput) -> DomainResult<()> {
        if input.messages.is_empty() {
            return Ok(());
        }

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let tables = TrackerTables::for_namespace(input.namespace);
        let columns = MessageColumns::from(input.messages);

        let inserted = conn
            .execute(
                format!(
                    "INSERT INTO {} (device_id, seq, pos, accuracy, sensors, error, envelope, received_at)
                     SELECT m.device_id, m.seq, point(m.lat, m.lon), m.accuracy, m.sensors, m.error, m.envelope, m.received_at
                     FROM UNNEST($1::int8[], $2::int8[], $3::float8[], $4::float8[], $5::int4[],
                                 $6::jsonb[], $7::text[], $8::jsonb[], $9::timestamptz[])
                          AS m(device_id, seq, lat, lon, accuracy, sensors, error, envelope, received_at)",
                    tables.message
                )
                .as_str(),
                &[
                    &columns.device_ids,
                    &columns.seqs,
                    &columns.latitudes,
                    &columns.longitudes,
                    &columns.accuracies,
                    &columns.sensors,
                    &columns.errors,
                    &columns.envelopes,
                    &columns.received_at,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(inserted, "inserted telemetry messages");
        Ok(())
    }

    #[instrument(skip(self, input), fields(namespace = input.namespace, devices = input.device_ids.len(), from = %input.from, to = %input.to))]
    async fn query_messages(
        &self,
        input: QueryMessagesInput,
    ) -> DomainResult<Vec<TelemetryMessage>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let tables = TrackerTables::for_namespace(input.namespace);
        let rows = conn
            .query(
                format!(
                    "SELECT device_id, seq, pos[0], pos[1], accuracy, sensors, error, envelope, received_at
                     FROM {}
                     WHERE device_id = ANY($1) AND seq BETWEEN $2 AND $3
                     ORDER BY seq ASC
                     LIMIT $4",
                    tables.message
                )
                .as_str(),
                &[
                    &input.device_ids,
                    &input.from.value(),
                    &input.to.value(),
                    &input.limit,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let messages: Vec<TelemetryMessage> = rows
            .iter()
            .map(|row| {
                TelemetryMessageRow {
                    device_id: row.get(0),
                    seq: row.get(1),
                    latitude: row.get(2),
                    longitude: row.get(3),
                    accuracy: row.get(4),
                    sensors: row.get(5),
                    error: row.get(6),
                    envelope: row.get(7),
                    received_at: row.get(8),
                }
                .into()
            })
            .collect();

        debug!(count = messages.len(), "queried telemetry messages");
        Ok(messages)
    }

    #[instrument(skip(self))]
    async fn latest_sequence(&self, namespace: NamespaceId) -> DomainResult<Option<Sequence>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let tables = TrackerTables::for_namespace(namespace);
        let row = conn
            .query_opt(
                format!(
                    "SELECT seq FROM {} ORDER BY seq DESC LIMIT 1",
                    tables.message
                )
                .as_str(),
                &[],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(row.map(|r| Sequence::new(r.get(0))))
    }
}
