use std::path::Path;
use std::sync::{Arc, Mutex};

use arrow_array::{
    Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::StoreError;
use crate::memory::types::{
    ConversationMessage, EntryId, MemoryEntry, MessageType, NewConversationMessage,
    NewMemoryEntry,
};
use crate::storage::{
    ConversationLog, EntryClock, MemoryStore, StoreResult, newest_first, sql_quote,
};

const MEMORY_TABLE: &str = "memory";
const CONVERSATIONS_TABLE: &str = "conversations";

/// LanceDB-backed memory buffer and conversation log.
///
/// Entry ids and timestamps continue from the highest persisted values when a
/// data directory is reopened.
pub struct LanceStore {
    connection: Connection,
    memory_table: Table,
    conversations_table: Table,
    clock: Mutex<EntryClock>,
}

impl LanceStore {
    /// Connect to `path`, creating the tables on first use
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let uri = path
            .to_str()
            .ok_or_else(|| StoreError::Unavailable("Invalid path encoding".to_string()))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to LanceDB: {e}")))?;

        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to list tables: {e}")))?;

        let memory_table =
            Self::open_or_create(&connection, &names, MEMORY_TABLE, Self::memory_schema()).await?;
        let conversations_table = Self::open_or_create(
            &connection,
            &names,
            CONVERSATIONS_TABLE,
            Self::conversations_schema(),
        )
        .await?;

        let store = Self {
            connection,
            memory_table,
            conversations_table,
            clock: Mutex::new(EntryClock::default()),
        };

        let (last_id, last_timestamp) = store.last_persisted_stamp().await?;
        *store.clock_guard()? = EntryClock::resume(last_id, last_timestamp);
        tracing::debug!("LanceStore opened at {} (last entry id {last_id})", path.display());

        Ok(store)
    }

    async fn open_or_create(
        connection: &Connection,
        existing: &[String],
        name: &str,
        schema: Arc<Schema>,
    ) -> StoreResult<Table> {
        if existing.iter().any(|n| n == name) {
            tracing::debug!("Opening existing {name} table");
            return connection
                .open_table(name)
                .execute()
                .await
                .map_err(|e| StoreError::Unavailable(format!("Failed to open {name} table: {e}")));
        }

        tracing::info!("Creating {name} table");
        let batch = RecordBatch::new_empty(schema.clone());
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        connection
            .create_table(name, Box::new(batches))
            .execute()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to create {name} table: {e}")))
    }

    /// Names of the tables in the underlying database
    pub async fn table_names(&self) -> StoreResult<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to list tables: {e}")))
    }

    fn memory_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("user_id", DataType::Utf8, false),
            Field::new("agent_type", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("session_id", DataType::Utf8, true),
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
        ]))
    }

    fn conversations_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("user_id", DataType::Utf8, false),
            Field::new("agent_type", DataType::Utf8, false),
            Field::new("message_type", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("session_id", DataType::Utf8, true),
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("metadata", DataType::Utf8, false),
        ]))
    }

    fn memory_to_batch(entry: &MemoryEntry) -> StoreResult<RecordBatch> {
        RecordBatch::try_new(
            Self::memory_schema(),
            vec![
                Arc::new(Int64Array::from(vec![entry.id.as_u64() as i64])),
                Arc::new(StringArray::from(vec![entry.user_id.as_str()])),
                Arc::new(StringArray::from(vec![entry.agent_type.as_str()])),
                Arc::new(StringArray::from(vec![entry.content.as_str()])),
                Arc::new(StringArray::from(vec![entry.session_id.as_deref()])),
                Arc::new(
                    TimestampMicrosecondArray::from(vec![entry.timestamp.timestamp_micros()])
                        .with_timezone("UTC"),
                ),
            ],
        )
        .map_err(|e| StoreError::WriteRejected(format!("Failed to create RecordBatch: {e}")))
    }

    fn message_to_batch(message: &ConversationMessage) -> StoreResult<RecordBatch> {
        let metadata = serde_json::to_string(&message.metadata)
            .map_err(|e| StoreError::WriteRejected(format!("Failed to encode metadata: {e}")))?;
        let id = message.id.to_string();

        RecordBatch::try_new(
            Self::conversations_schema(),
            vec![
                Arc::new(StringArray::from(vec![id.as_str()])),
                Arc::new(StringArray::from(vec![message.user_id.as_str()])),
                Arc::new(StringArray::from(vec![message.agent_type.as_str()])),
                Arc::new(StringArray::from(vec![message.message_type.as_str()])),
                Arc::new(StringArray::from(vec![message.content.as_str()])),
                Arc::new(StringArray::from(vec![message.session_id.as_deref()])),
                Arc::new(
                    TimestampMicrosecondArray::from(vec![message.timestamp.timestamp_micros()])
                        .with_timezone("UTC"),
                ),
                Arc::new(StringArray::from(vec![metadata.as_str()])),
            ],
        )
        .map_err(|e| StoreError::WriteRejected(format!("Failed to create RecordBatch: {e}")))
    }

    fn batch_to_memories(batch: &RecordBatch) -> StoreResult<Vec<MemoryEntry>> {
        let ids = int64_column(batch, "id")?;
        let user_ids = string_column(batch, "user_id")?;
        let agent_types = string_column(batch, "agent_type")?;
        let contents = string_column(batch, "content")?;
        let session_ids = string_column(batch, "session_id")?;
        let timestamps = timestamp_column(batch, "timestamp")?;

        (0..batch.num_rows())
            .map(|row| {
                Ok(MemoryEntry {
                    id: EntryId(ids.value(row) as u64),
                    user_id: user_ids.value(row).to_string(),
                    agent_type: agent_types.value(row).to_string(),
                    content: contents.value(row).to_string(),
                    session_id: optional_string(session_ids, row),
                    timestamp: parse_timestamp(timestamps.value(row))?,
                })
            })
            .collect()
    }

    fn batch_to_messages(batch: &RecordBatch) -> StoreResult<Vec<ConversationMessage>> {
        let ids = string_column(batch, "id")?;
        let user_ids = string_column(batch, "user_id")?;
        let agent_types = string_column(batch, "agent_type")?;
        let message_types = string_column(batch, "message_type")?;
        let contents = string_column(batch, "content")?;
        let session_ids = string_column(batch, "session_id")?;
        let timestamps = timestamp_column(batch, "timestamp")?;
        let metadata = string_column(batch, "metadata")?;

        (0..batch.num_rows())
            .map(|row| {
                let id = Uuid::parse_str(ids.value(row))
                    .map_err(|e| StoreError::Unavailable(format!("Failed to parse UUID: {e}")))?;
                let message_type = MessageType::parse(message_types.value(row)).ok_or_else(|| {
                    StoreError::Unavailable(format!(
                        "Unknown message type: {}",
                        message_types.value(row)
                    ))
                })?;
                let metadata: Map<String, Value> = serde_json::from_str(metadata.value(row))
                    .map_err(|e| {
                        StoreError::Unavailable(format!("Failed to decode metadata: {e}"))
                    })?;

                Ok(ConversationMessage {
                    id,
                    user_id: user_ids.value(row).to_string(),
                    agent_type: agent_types.value(row).to_string(),
                    message_type,
                    content: contents.value(row).to_string(),
                    session_id: optional_string(session_ids, row),
                    timestamp: parse_timestamp(timestamps.value(row))?,
                    metadata,
                })
            })
            .collect()
    }

    async fn collect(
        table: &Table,
        filter: Option<String>,
    ) -> StoreResult<Vec<RecordBatch>> {
        let query = match filter {
            Some(filter) => table.query().only_if(filter),
            None => table.query(),
        };

        let stream = query
            .execute()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to execute query: {e}")))?;

        stream
            .try_collect()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to collect query results: {e}")))
    }

    /// Highest persisted id and timestamp, for resuming the entry clock
    async fn last_persisted_stamp(&self) -> StoreResult<(u64, DateTime<Utc>)> {
        let batches = Self::collect(&self.memory_table, None).await?;
        let mut max_id = 0u64;
        let mut max_timestamp = DateTime::<Utc>::MIN_UTC;
        for batch in &batches {
            let ids = int64_column(batch, "id")?;
            let timestamps = timestamp_column(batch, "timestamp")?;
            for row in 0..ids.len() {
                max_id = max_id.max(ids.value(row) as u64);
                max_timestamp = max_timestamp.max(parse_timestamp(timestamps.value(row))?);
            }
        }
        Ok((max_id, max_timestamp))
    }

    fn clock_guard(&self) -> StoreResult<std::sync::MutexGuard<'_, EntryClock>> {
        self.clock
            .lock()
            .map_err(|_| StoreError::Unavailable("entry clock lock poisoned".to_string()))
    }

    /// Total memory entries across every user and agent
    pub async fn total_memories(&self) -> StoreResult<usize> {
        self.memory_table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to count memories: {e}")))
    }

    /// Total logged messages across every user
    pub async fn total_messages(&self) -> StoreResult<usize> {
        self.conversations_table
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to count messages: {e}")))
    }
}

#[async_trait]
impl MemoryStore for LanceStore {
    async fn append_memory(&self, entry: NewMemoryEntry) -> StoreResult<MemoryEntry> {
        let (id, timestamp) = self.clock_guard()?.next();
        let entry = entry.into_entry(id, timestamp);

        let schema = Self::memory_schema();
        let batch = Self::memory_to_batch(&entry)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.memory_table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| StoreError::WriteRejected(format!("Failed to insert memory: {e}")))?;

        Ok(entry)
    }

    async fn recent_memories(
        &self,
        user_id: &str,
        agent_type: &str,
        limit: usize,
    ) -> StoreResult<Vec<MemoryEntry>> {
        let filter = format!(
            "user_id = {} AND agent_type = {}",
            sql_quote(user_id),
            sql_quote(agent_type)
        );
        let batches = Self::collect(&self.memory_table, Some(filter)).await?;

        let mut entries = Vec::new();
        for batch in &batches {
            entries.extend(Self::batch_to_memories(batch)?);
        }
        entries.sort_by(newest_first);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn delete_memory(&self, id: EntryId) -> StoreResult<bool> {
        let predicate = format!("id = {}", id.as_u64() as i64);

        let existing = self
            .memory_table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to look up memory: {e}")))?;

        if existing == 0 {
            return Ok(false);
        }

        self.memory_table
            .delete(&predicate)
            .await
            .map_err(|e| StoreError::WriteRejected(format!("Failed to delete memory: {e}")))?;

        Ok(true)
    }

    async fn count_memories(&self, user_id: &str, agent_type: &str) -> StoreResult<usize> {
        let filter = format!(
            "user_id = {} AND agent_type = {}",
            sql_quote(user_id),
            sql_quote(agent_type)
        );
        self.memory_table
            .count_rows(Some(filter))
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to count memories: {e}")))
    }
}

#[async_trait]
impl ConversationLog for LanceStore {
    async fn append_message(
        &self,
        message: NewConversationMessage,
    ) -> StoreResult<ConversationMessage> {
        let message = message.into_message(Uuid::new_v4());

        let schema = Self::conversations_schema();
        let batch = Self::message_to_batch(&message)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.conversations_table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| StoreError::WriteRejected(format!("Failed to insert message: {e}")))?;

        Ok(message)
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ConversationMessage>> {
        let filter = format!("user_id = {}", sql_quote(user_id));
        let batches = Self::collect(&self.conversations_table, Some(filter)).await?;

        let mut messages = Vec::new();
        for batch in &batches {
            messages.extend(Self::batch_to_messages(batch)?);
        }
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        messages.truncate(limit);
        Ok(messages)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> StoreResult<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Unavailable(format!("Failed to get {name} column")))
}

fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> StoreResult<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| StoreError::Unavailable(format!("Failed to get {name} column")))
}

fn timestamp_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> StoreResult<&'a TimestampMicrosecondArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<TimestampMicrosecondArray>())
        .ok_or_else(|| StoreError::Unavailable(format!("Failed to get {name} column")))
}

fn optional_string(array: &StringArray, row: usize) -> Option<String> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row).to_string())
    }
}

fn parse_timestamp(micros: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| StoreError::Unavailable("Failed to parse timestamp".to_string()))
}
