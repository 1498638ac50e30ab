//! Batch query execution.
//!
//! The pipeline only sees the [`QueryExecutor`] trait; [`PostgresExecutor`]
//! is the `tokio-postgres` implementation the binary uses.

use anyhow::{bail, Context};
use futures::future::try_join_all;
use regex::Regex;
use std::sync::{Mutex, OnceLock};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, error, info, warn};

use crate::config::QueryConfig;
use crate::error::{Result, SourceError};
use crate::schema::{ResultSet, Row, Value};

/// Runs statements against one open connection.
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute a statement and return its rows. Stored-procedure calls
    /// return their first result subset.
    async fn query(&self, statement: &str) -> anyhow::Result<Vec<Row>>;

    /// Release the connection. Called exactly once per run.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Run every entity's statement concurrently; results align with `queries`.
pub async fn query_all(
    executor: &dyn QueryExecutor,
    queries: &[QueryConfig],
) -> Result<Vec<ResultSet>> {
    try_join_all(queries.iter().map(|query| async move {
        let rows = executor
            .query(&query.statement)
            .await
            .map_err(|source| SourceError::Query {
                entity: query.name.clone(),
                source,
            })?;
        debug!("{}: fetched {} rows", query.name, rows.len());
        Ok::<_, SourceError>(ResultSet::new(query.clone(), rows))
    }))
    .await
}

/// `CALL proc(...)` statements come back as multiple result subsets.
pub fn is_procedure_call(statement: &str) -> bool {
    static CALL: OnceLock<Regex> = OnceLock::new();
    CALL.get_or_init(|| Regex::new(r"(?i)^\s*call\s+\S").expect("valid regex"))
        .is_match(statement)
}

pub struct PostgresExecutor {
    client: RwLock<Option<Client>>,
    connection: Mutex<Option<JoinHandle<()>>>,
}

impl PostgresExecutor {
    /// Open a connection and drive it on a background task.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("Failed to connect to database")?;

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("database connection error: {}", e);
            }
        });
        info!("Database connection established");

        Ok(Self {
            client: RwLock::new(Some(client)),
            connection: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait::async_trait]
impl QueryExecutor for PostgresExecutor {
    async fn query(&self, statement: &str) -> anyhow::Result<Vec<Row>> {
        let guard = self.client.read().await;
        let Some(client) = guard.as_ref() else {
            bail!("database connection is closed");
        };

        if is_procedure_call(statement) {
            let messages = client.simple_query(statement).await?;
            return Ok(first_result_subset(messages, &[]));
        }

        let prepared = client.prepare(statement).await?;
        let types: Vec<Type> = prepared.columns().iter().map(|c| c.type_().clone()).collect();
        if types.iter().all(has_binary_decoder) {
            let rows = client.query(&prepared, &[]).await?;
            return rows.iter().map(convert_row).collect();
        }

        // Columns without a binary decoder are read through the text protocol.
        debug!("Falling back to text protocol for: {}", statement);
        let messages = client.simple_query(statement).await?;
        Ok(first_result_subset(messages, &types))
    }

    async fn close(&self) -> anyhow::Result<()> {
        // Dropping the client ends the connection future.
        let client = self.client.write().await.take();
        if client.is_none() {
            return Ok(());
        }
        drop(client);

        let handle = self.connection.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.await.ok();
        }
        info!("Database connection closed");
        Ok(())
    }
}

/// Rows of the first result subset. `types` (when known) drives how each
/// text value is read back; unknown columns stay text.
fn first_result_subset(messages: Vec<SimpleQueryMessage>, types: &[Type]) -> Vec<Row> {
    let mut rows = Vec::new();
    for message in messages {
        match message {
            SimpleQueryMessage::Row(row) => {
                let mut out = Row::new();
                for (index, column) in row.columns().iter().enumerate() {
                    let value = match (row.get(index), types.get(index)) {
                        (None, _) => Value::Null,
                        (Some(text), Some(ty)) => value_from_text(ty, text),
                        (Some(text), None) => Value::from(text),
                    };
                    out.insert(column.name(), value);
                }
                rows.push(out);
            }
            SimpleQueryMessage::CommandComplete(_) => break,
            _ => {}
        }
    }
    rows
}

const TEXT_TYPES: &[Type] = &[Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME];

/// Column types [`convert_row`] can decode from the binary protocol.
fn has_binary_decoder(ty: &Type) -> bool {
    [
        Type::BOOL,
        Type::INT2,
        Type::INT4,
        Type::INT8,
        Type::FLOAT4,
        Type::FLOAT8,
        Type::BYTEA,
        Type::JSON,
        Type::JSONB,
        Type::UUID,
    ]
    .contains(ty)
        || TEXT_TYPES.contains(ty)
}

fn convert_row(row: &tokio_postgres::Row) -> anyhow::Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(index)?.map(Value::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(index)?.map(|v| Value::Int(v.into()))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(index)?.map(|v| Value::Int(v.into()))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(index)?.map(Value::Int)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(index)?.map(|v| Value::Float(v.into()))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(index)?.map(Value::Float)
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(index)?.map(Value::Bytes)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<serde_json::Value>>(index)?.map(Value::Json)
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<uuid::Uuid>>(index)?
                .map(|v| Value::Text(v.to_string()))
        } else if TEXT_TYPES.contains(ty) {
            row.try_get::<_, Option<String>>(index)?.map(Value::Text)
        } else {
            bail!("column `{}` has no binary decoder for type {}", column.name(), ty);
        };
        out.insert(column.name(), value.unwrap_or(Value::Null));
    }
    Ok(out)
}

/// Read a text-protocol value back into the [`Value`] its column type implies.
/// Anything without a richer mapping (numeric, dates, uuid, ...) stays text.
fn value_from_text(ty: &Type, text: &str) -> Value {
    let parsed = if *ty == Type::BOOL {
        match text {
            "t" | "true" => Some(Value::Bool(true)),
            "f" | "false" => Some(Value::Bool(false)),
            _ => None,
        }
    } else if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
        text.parse::<i64>().ok().map(Value::Int)
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        text.parse::<f64>().ok().map(Value::Float)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        serde_json::from_str(text).ok().map(Value::Json)
    } else if *ty == Type::BYTEA {
        text.strip_prefix("\\x")
            .and_then(|digits| hex::decode(digits).ok())
            .map(Value::Bytes)
    } else {
        return Value::from(text);
    };

    parsed.unwrap_or_else(|| {
        warn!("Could not parse `{}` as {}; keeping it as text", text, ty);
        Value::from(text)
    })
}
