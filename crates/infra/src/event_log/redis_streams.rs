//! Redis Streams-backed event log.
//!
//! - **Append**: `XADD <stream> * sku .. warehouse_id .. change .. channel .. reason ..`
//! - **Read**: `XREAD COUNT n BLOCK 0 STREAMS <stream> <after>` (waits for new entries)
//! - **Tail**: `XREVRANGE <stream> + - COUNT 1`
//!
//! No consumer groups: the reader owns its position and persists it through a
//! checkpoint store.
//!
//! Blocking reads run on their own connection so they never stall appends.
//! A read that is cancelled mid-flight discards that connection; the next
//! read dials a fresh one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use omnistock_events::{EventLog, EventLogError, InventoryEvent, LogEntry, LogPosition};

/// Default stream key for inventory events.
pub const DEFAULT_STREAM_KEY: &str = "inventory_events";

pub struct RedisStreamLog {
    client: redis::Client,
    stream_key: String,
    writer: MultiplexedConnection,
    reader: Mutex<Option<MultiplexedConnection>>,
}

impl core::fmt::Debug for RedisStreamLog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamLog")
            .field("stream_key", &self.stream_key)
            .finish_non_exhaustive()
    }
}

impl RedisStreamLog {
    /// Connect to `redis_url` and bind to `stream_key`.
    pub async fn connect(
        redis_url: impl AsRef<str>,
        stream_key: impl Into<String>,
    ) -> Result<Self, EventLogError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| EventLogError::Connection(e.to_string()))?;
        let writer = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventLogError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            stream_key: stream_key.into(),
            writer,
            reader: Mutex::new(None),
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    async fn reader_connection(&self) -> Result<MultiplexedConnection, EventLogError> {
        if let Some(conn) = self.reader.lock().await.take() {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventLogError::Connection(e.to_string()))
    }
}

#[async_trait]
impl EventLog for RedisStreamLog {
    #[instrument(skip(self, event), fields(stream_key = %self.stream_key, sku = %event.sku), err)]
    async fn append(&self, event: &InventoryEvent) -> Result<LogPosition, EventLogError> {
        let mut conn = self.writer.clone();
        let id: String = conn
            .xadd(&self.stream_key, "*", event.to_fields().as_slice())
            .await
            .map_err(|e| EventLogError::Command(format!("XADD failed: {e}")))?;

        id.parse()
            .map_err(|e| EventLogError::Malformed(format!("XADD returned {id:?}: {e}")))
    }

    async fn read_after(&self, after: LogPosition, max: usize) -> Result<Vec<LogEntry>, EventLogError> {
        let options = StreamReadOptions::default().count(max.max(1)).block(0);
        let after_id = after.to_string();

        loop {
            // Held outside the mutex: if this future is dropped the connection
            // (with its pending XREAD) goes with it.
            let mut conn = self.reader_connection().await?;
            let reply: StreamReadReply = conn
                .xread_options(&[&self.stream_key], &[&after_id], &options)
                .await
                .map_err(|e| EventLogError::Command(format!("XREAD failed: {e}")))?;
            *self.reader.lock().await = Some(conn);

            let entries = reply
                .keys
                .into_iter()
                .filter(|k| k.key == self.stream_key)
                .flat_map(|k| k.ids)
                .map(|id| entry_from_stream_id(&id))
                .collect::<Result<Vec<_>, _>>()?;

            if !entries.is_empty() {
                debug!(stream_key = %self.stream_key, count = entries.len(), "read stream entries");
                return Ok(entries);
            }
        }
    }

    async fn tail(&self) -> Result<LogPosition, EventLogError> {
        let mut conn = self.writer.clone();
        let reply: StreamRangeReply = conn
            .xrevrange_count(&self.stream_key, "+", "-", 1)
            .await
            .map_err(|e| EventLogError::Command(format!("XREVRANGE failed: {e}")))?;

        match reply.ids.first() {
            Some(id) => parse_position(&id.id),
            None => Ok(LogPosition::ZERO),
        }
    }
}

fn parse_position(id: &str) -> Result<LogPosition, EventLogError> {
    id.parse()
        .map_err(|e| EventLogError::Malformed(format!("stream id {id:?}: {e}")))
}

/// Convert a raw stream entry; non-string values are rejected as malformed.
fn entry_from_stream_id(entry: &StreamId) -> Result<LogEntry, EventLogError> {
    let position = parse_position(&entry.id)?;
    let mut fields = BTreeMap::new();
    for (name, value) in &entry.map {
        let value: String = redis::from_redis_value(value).map_err(|e| {
            EventLogError::Malformed(format!("entry {} field {name}: {e}", entry.id))
        })?;
        fields.insert(name.clone(), value);
    }
    Ok(LogEntry::new(position, fields))
}
