//! Database gateway - read-only SQL over PostgreSQL
//!
//! The schema is introspected once when the gateway connects and embedded in
//! the `run_sql_query` tool description. Every statement goes through
//! [`check_read_only`] before the executor sees it.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::{Map, Value, json};
use tokio_postgres::NoTls;

use super::sql_guard::check_read_only;
use super::{Gateway, GatewayError, ToolPayload, string_arg, unsupported_tool};
use crate::tools::{ParamSpec, ParamType, ToolSpec};

pub const RUN_SQL_QUERY_TOOL: &str = "run_sql_query";

const COLUMNS_SQL: &str = "
    SELECT c.table_name::text, c.column_name::text, c.data_type::text
    FROM information_schema.columns c
    JOIN information_schema.tables t
        ON t.table_schema = c.table_schema AND t.table_name = c.table_name
    WHERE c.table_schema = 'public' AND t.table_type = 'BASE TABLE'
    ORDER BY c.table_name, c.ordinal_position";

const RELATIONSHIPS_SQL: &str = "
    SELECT
        tc.table_name::text,
        kcu.column_name::text,
        ccu.table_name::text,
        ccu.column_name::text
    FROM information_schema.table_constraints AS tc
    JOIN information_schema.key_column_usage AS kcu
        ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
    JOIN information_schema.constraint_column_usage AS ccu
        ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
    WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = 'public'
    ORDER BY tc.table_name, kcu.column_name";

/// Rows returned by a query, capped at the gateway's limit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub rows: Vec<Map<String, Value>>,
    /// More rows existed than were returned
    pub truncated: bool,
}

impl RowSet {
    /// Build from up to `max_rows + 1` fetched rows
    pub fn from_fetched(mut rows: Vec<Map<String, Value>>, max_rows: usize) -> Self {
        let truncated = rows.len() > max_rows;
        rows.truncate(max_rows);
        Self { rows, truncated }
    }

    pub fn to_model_json(&self) -> Value {
        json!({
            "row_count": self.rows.len(),
            "truncated": self.truncated,
            "rows": self.rows,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Foreign key `from_table.from_column -> to_table.to_column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// Tables, columns and foreign keys of the `public` schema
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
    pub relationships: Vec<Relationship>,
}

impl SchemaInfo {
    /// Group `(table, column, data_type)` rows, already ordered by table
    pub fn from_columns(columns: Vec<(String, String, String)>, relationships: Vec<Relationship>) -> Self {
        let mut tables: Vec<TableInfo> = Vec::new();
        for (table, name, data_type) in columns {
            let column = ColumnInfo { name, data_type };
            match tables.last_mut() {
                Some(last) if last.name == table => last.columns.push(column),
                _ => tables.push(TableInfo {
                    name: table,
                    columns: vec![column],
                }),
            }
        }
        Self { tables, relationships }
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Text block embedded in the tool description
    pub fn describe(&self) -> String {
        let mut out = String::from("Tables and Columns:\n");
        if self.tables.is_empty() {
            out.push_str("(no tables)\n");
        }
        for table in &self.tables {
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| format!("{} ({})", c.name, c.data_type))
                .collect();
            let _ = writeln!(out, "- {}: {}", table.name, columns.join(", "));
        }

        out.push_str("\nRelationships:\n");
        if self.relationships.is_empty() {
            out.push_str("(none)\n");
        }
        for r in &self.relationships {
            let _ = writeln!(
                out,
                "- {}.{} -> {}.{}",
                r.from_table, r.from_column, r.to_table, r.to_column
            );
        }
        out
    }
}

/// Executes statements that already passed the read-only guard
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch_rows(&self, statement: &str, max_rows: usize) -> Result<RowSet, GatewayError>;

    async fn describe_schema(&self) -> Result<SchemaInfo, GatewayError>;
}

/// Connection settings for [`PostgresExecutor`]
#[derive(Debug, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub pool_size: usize,
    /// Applies to pool waits and each statement
    pub timeout: Duration,
}

impl PostgresSettings {
    pub fn create_pool(&self) -> Result<Pool, GatewayError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool = PoolConfig::new(self.pool_size);
        pool.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| GatewayError::QueryExecution(format!("Failed to create pool: {}", e)))
    }
}

/// PostgreSQL executor over a deadpool connection pool
#[derive(Clone)]
pub struct PostgresExecutor {
    pool: Pool,
    timeout: Duration,
}

impl PostgresExecutor {
    pub fn new(settings: &PostgresSettings) -> Result<Self, GatewayError> {
        Ok(Self::from_pool(settings.create_pool()?, settings.timeout))
    }

    pub fn from_pool(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn connection(&self) -> Result<deadpool_postgres::Object, GatewayError> {
        self.pool.get().await.map_err(|e| {
            log::error!("Database connection failed: {}", e);
            GatewayError::QueryExecution(format!("Failed to get connection: {}", e))
        })
    }
}

fn db_error(e: tokio_postgres::Error) -> GatewayError {
    let message = e
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| e.to_string());
    GatewayError::QueryExecution(message)
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    async fn fetch_rows(&self, statement: &str, max_rows: usize) -> Result<RowSet, GatewayError> {
        let mut conn = self.connection().await?;
        let client: &mut tokio_postgres::Client = &mut conn;
        let tx = client.build_transaction().read_only(true).start().await.map_err(db_error)?;

        tx.batch_execute(&format!("SET LOCAL statement_timeout = {}", self.timeout.as_millis()))
            .await
            .map_err(db_error)?;

        // Newlines keep a trailing line comment from swallowing the wrapper
        let wrapped = format!(
            "SELECT row_to_json(q)::text FROM (\n{}\n) q LIMIT {}",
            statement,
            max_rows + 1
        );
        let fetched = tx.query(wrapped.as_str(), &[]).await.map_err(db_error)?;

        let mut rows = Vec::with_capacity(fetched.len());
        for row in fetched {
            let text: String = row.try_get(0).map_err(db_error)?;
            let object: Map<String, Value> = serde_json::from_str(&text)
                .map_err(|e| GatewayError::QueryExecution(format!("Unreadable row: {}", e)))?;
            rows.push(object);
        }
        tx.commit().await.map_err(db_error)?;

        Ok(RowSet::from_fetched(rows, max_rows))
    }

    async fn describe_schema(&self) -> Result<SchemaInfo, GatewayError> {
        let conn = self.connection().await?;

        let columns: Vec<(String, String, String)> = conn
            .query(COLUMNS_SQL, &[])
            .await
            .map_err(db_error)?
            .into_iter()
            .map(|row| (row.get(0), row.get(1), row.get(2)))
            .collect();

        let relationships: Vec<Relationship> = conn
            .query(RELATIONSHIPS_SQL, &[])
            .await
            .map_err(db_error)?
            .into_iter()
            .map(|row| Relationship {
                from_table: row.get(0),
                from_column: row.get(1),
                to_table: row.get(2),
                to_column: row.get(3),
            })
            .collect();

        Ok(SchemaInfo::from_columns(columns, relationships))
    }
}

/// Gateway serving `run_sql_query`
pub struct DatabaseGateway<E: QueryExecutor> {
    executor: E,
    schema: SchemaInfo,
    max_rows: usize,
}

impl<E: QueryExecutor> DatabaseGateway<E> {
    /// Introspect the schema and build the gateway
    pub async fn connect(executor: E, max_rows: usize) -> Result<Self, GatewayError> {
        let schema = executor.describe_schema().await?;
        log::info!(
            "Database schema loaded: {} table(s), {} relationship(s)",
            schema.tables.len(),
            schema.relationships.len()
        );
        Ok(Self {
            executor,
            schema,
            max_rows,
        })
    }

    pub fn schema(&self) -> &SchemaInfo {
        &self.schema
    }

    /// Guard and run one statement
    pub async fn run_query(&self, query: &str) -> Result<RowSet, GatewayError> {
        let statement = check_read_only(query).inspect_err(|e| {
            log::warn!("Rejected SQL statement: {}", e);
        })?;
        log::info!("Executing SQL query: {}", statement);
        self.executor.fetch_rows(&statement, self.max_rows).await
    }
}

#[async_trait]
impl<E: QueryExecutor> Gateway for DatabaseGateway<E> {
    fn name(&self) -> &'static str {
        "database"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        let description = format!(
            "Execute read-only SQL queries on the PostgreSQL database with the following schema:\n\n{}\n\
             Only single SELECT statements are accepted. At most {} rows are returned.",
            self.schema.describe(),
            self.max_rows
        );
        vec![ToolSpec::new(RUN_SQL_QUERY_TOOL, description).with_param(ParamSpec::required(
            "query",
            ParamType::String,
            "SQL query to execute",
        ))]
    }

    async fn invoke(&self, tool_name: &str, args: &Map<String, Value>) -> Result<ToolPayload, GatewayError> {
        if tool_name != RUN_SQL_QUERY_TOOL {
            return Err(unsupported_tool(self.name(), tool_name));
        }
        let query = string_arg(args, "query")?;
        self.run_query(query).await.map(ToolPayload::Rows)
    }
}
