//! PostgreSQL provider backed by sqlx

pub mod broker;
pub mod params;
pub mod rows;

use crate::config::{ConnectType, ProviderConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    downcast_connection, find_source, ConnectOptions, Provider, ProviderConnection, QueryControl,
    QueryOptions,
};
use crate::session::{ContextBinding, Credentials};
use async_trait::async_trait;
use cascade_core::QueryResult;
use params::{apply_control, bind_all, is_identifier_path, is_service_key, quote_ident, NamedStatement};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{ConnectOptions as _, Connection as _, Postgres};
use std::collections::HashMap;
use std::time::Duration;

pub const POSTGRES_KIND: &str = "db-postgres";

/// Namespace of session variables bound without one
pub const DEFAULT_CONTEXT_NAMESPACE: &str = "cascade";

/// `connectConfig` of a PostgreSQL provider
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub ssl_mode: Option<String>,
    #[serde(default)]
    pub connect_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

fn default_port() -> u16 {
    5432
}

impl PgConnectConfig {
    fn connect_options(
        &self,
        credentials: &Credentials,
        connect_place: Option<&str>,
    ) -> ProviderResult<PgConnectOptions> {
        if self.host.is_empty() {
            return Err(ProviderError::config("PostgreSQL host cannot be empty"));
        }
        if self.database.is_empty() {
            return Err(ProviderError::config("PostgreSQL database cannot be empty"));
        }

        let application_name = connect_place
            .or(self.application_name.as_deref())
            .unwrap_or("cascade");
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .application_name(application_name);
        if let Some(user) = &credentials.user {
            options = options.username(user);
        }
        if let Some(password) = &credentials.password {
            options = options.password(password);
        }
        if let Some(ssl_mode) = &self.ssl_mode {
            let mode = ssl_mode
                .parse::<PgSslMode>()
                .map_err(|e| ProviderError::config(format!("invalid ssl_mode '{}': {}", ssl_mode, e)))?;
            options = options.ssl_mode(mode);
        }
        Ok(options)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.unwrap_or(30))
    }
}

/// Connection handed out by [`PostgresProvider`]
pub enum PgHandle {
    Direct(PgConnection),
    Pooled(PoolConnection<Postgres>),
}

impl PgHandle {
    fn conn(&mut self) -> &mut PgConnection {
        match self {
            PgHandle::Direct(conn) => conn,
            PgHandle::Pooled(conn) => conn,
        }
    }
}

impl ProviderConnection for PgHandle {}

pub struct PostgresProvider {
    config: ProviderConfig,
    connect: PgConnectConfig,
    /// Pools keyed by data-source user ("" for the shared pool)
    pools: Mutex<HashMap<String, PgPool>>,
}

impl PostgresProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let connect: PgConnectConfig = serde_json::from_value(config.connect_config.clone())
            .map_err(|e| ProviderError::config(format!("provider '{}': {}", config.name, e)))?;
        Ok(Self { config, connect, pools: Mutex::new(HashMap::new()) })
    }

    fn pool_for(&self, credentials: &Credentials, options: &ConnectOptions) -> ProviderResult<PgPool> {
        let key = match self.config.connect_type {
            ConnectType::PoolPerUser => credentials.user.clone().unwrap_or_default(),
            _ => String::new(),
        };
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        let connect_options = self.connect.connect_options(credentials, options.connect_place.as_deref())?;
        let pool = PgPoolOptions::new()
            .max_connections(self.connect.max_connections.unwrap_or(5))
            .acquire_timeout(self.connect.connect_timeout())
            .connect_lazy_with(connect_options);
        tracing::info!(provider = %self.name(), pool = %key, "Created connection pool");
        pools.insert(key, pool.clone());
        Ok(pool)
    }

    fn failed(&self, message: impl Into<String>, err: sqlx::Error) -> ProviderError {
        ProviderError::execution_with_source(self.name(), message, err)
    }

    async fn fetch(
        &self,
        connection: &mut dyn ProviderConnection,
        sql: &str,
        values: &[JsonValue],
        options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        let handle = downcast_connection::<PgHandle>(connection, self.name())?;
        tracing::debug!(provider = %self.name(), sql = %sql, "Executing statement");

        let query = bind_all(sqlx::query(sql), values);
        let fetched = query.fetch_all(handle.conn());
        let result = match &options.cancellation {
            Some(token) => tokio::select! {
                result = fetched => result,
                _ = token.cancelled() => {
                    return Err(ProviderError::execution(self.name(), "request was cancelled"));
                }
            },
            None => fetched.await,
        };
        let records = result.map_err(|e| self.failed("statement failed", e))?;

        let meta_data = records.first().map(rows::column_meta).unwrap_or_default();
        let data = records
            .iter()
            .map(|row| rows::convert_row(row, options.row_mode))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.failed("failed to decode row", e))?;
        Ok(QueryResult::rows(data).with_meta_data(meta_data))
    }

    async fn execute_raw(&self, connection: &mut dyn ProviderConnection, sql: &str) -> ProviderResult<()> {
        let handle = downcast_connection::<PgHandle>(connection, self.name())?;
        sqlx::query(sql)
            .execute(handle.conn())
            .await
            .map_err(|e| self.failed(format!("{} failed", sql), e))?;
        Ok(())
    }
}

/// `select * from name(k => $1, ...)` over the data keys of `params`
fn function_call(name: &str, params: &JsonValue) -> Option<(String, Vec<JsonValue>)> {
    if !is_identifier_path(name) {
        return None;
    }
    let mut names = Vec::new();
    let mut values = Vec::new();
    if let Some(fields) = params.as_object() {
        for (key, value) in fields.iter().filter(|(key, _)| !is_service_key(key)) {
            values.push(value.clone());
            names.push(format!("{} => ${}", quote_ident(key), values.len()));
        }
    }
    Some((format!("select * from {}({})", name, names.join(", ")), values))
}

/// Setting name and text value for `set_config`
fn context_setting(binding: &ContextBinding) -> (String, String) {
    let namespace = binding.namespace.as_deref().unwrap_or(DEFAULT_CONTEXT_NAMESPACE);
    let value = match &binding.value {
        JsonValue::Null => String::new(),
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    };
    (format!("{}.{}", namespace, binding.name), value)
}

#[async_trait]
impl Provider for PostgresProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> ProviderResult<Box<dyn ProviderConnection>> {
        self.config.validate_connect()?;

        let handle = match self.config.connect_type {
            ConnectType::User => {
                let connect_options =
                    self.connect.connect_options(credentials, options.connect_place.as_deref())?;
                let conn = tokio::time::timeout(self.connect.connect_timeout(), connect_options.connect())
                    .await
                    .map_err(|_| ProviderError::connection(self.name(), "connect timed out"))?
                    .map_err(|e| ProviderError::connection_with_source(self.name(), "connect failed", e))?;
                PgHandle::Direct(conn)
            }
            ConnectType::Pool | ConnectType::PoolPerUser => {
                let pool = self.pool_for(credentials, options)?;
                let conn = pool.acquire().await.map_err(|e| {
                    ProviderError::connection_with_source(self.name(), "failed to acquire pooled connection", e)
                })?;
                PgHandle::Pooled(conn)
            }
        };
        Ok(Box::new(handle))
    }

    async fn set_context(
        &self,
        connection: &mut dyn ProviderConnection,
        bindings: &[ContextBinding],
    ) -> ProviderResult<()> {
        let handle = downcast_connection::<PgHandle>(connection, self.name())?;
        for binding in bindings {
            let (name, value) = context_setting(binding);
            sqlx::query("select set_config($1, $2, false)")
                .bind(&name)
                .bind(&value)
                .execute(handle.conn())
                .await
                .map_err(|e| {
                    ProviderError::connection_with_source(self.name(), format!("failed to set {}", name), e)
                })?;
        }
        Ok(())
    }

    async fn query(
        &self,
        connection: &mut dyn ProviderConnection,
        statement: &str,
        params: &JsonValue,
        options: &QueryOptions,
        control: Option<&QueryControl>,
    ) -> ProviderResult<QueryResult> {
        let named = NamedStatement::parse(statement);
        let sql = apply_control(&named.sql, control, options.return_rn);
        self.fetch(connection, &sql, &named.values(params), options).await
    }

    async fn func(
        &self,
        connection: &mut dyn ProviderConnection,
        name: &str,
        params: &JsonValue,
        options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        let (sql, values) = function_call(name.trim(), params)
            .ok_or_else(|| ProviderError::execution(self.name(), format!("invalid function name '{}'", name)))?;
        self.fetch(connection, &sql, &values, options).await
    }

    async fn broker(
        &self,
        connection: &mut dyn ProviderConnection,
        action: &str,
        params: &JsonValue,
        options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        let statement = broker::build(self.name(), action.trim(), params)?;
        self.fetch(connection, &statement.sql, &statement.values, options).await
    }

    async fn start_transaction(&self, connection: &mut dyn ProviderConnection) -> ProviderResult<()> {
        self.execute_raw(connection, "BEGIN").await
    }

    async fn commit(&self, connection: &mut dyn ProviderConnection) -> ProviderResult<()> {
        self.execute_raw(connection, "COMMIT").await
    }

    async fn rollback(&self, connection: &mut dyn ProviderConnection) -> ProviderResult<()> {
        self.execute_raw(connection, "ROLLBACK").await
    }

    async fn release(&self, connection: Option<Box<dyn ProviderConnection>>) -> ProviderResult<()> {
        let Some(connection) = connection else {
            return Ok(());
        };
        let handle = connection
            .into_any()
            .downcast::<PgHandle>()
            .map_err(|_| ProviderError::connection(self.name(), "connection belongs to another provider"))?;
        match *handle {
            PgHandle::Direct(conn) => conn
                .close()
                .await
                .map_err(|e| ProviderError::connection_with_source(self.name(), "close failed", e)),
            // returned to the pool on drop
            PgHandle::Pooled(_) => Ok(()),
        }
    }

    fn format_error(&self, error: &(dyn std::error::Error + 'static)) -> String {
        let Some(sqlx::Error::Database(db)) = find_source::<sqlx::Error>(error) else {
            return error.to_string();
        };
        let mut message = db.message().to_string();
        if let Some(constraint) = db.constraint() {
            message.push_str(&format!(" (constraint {})", constraint));
        }
        if let Some(detail) = db
            .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
            .and_then(|pg| pg.detail())
        {
            message.push_str(&format!(": {}", detail));
        }
        message
    }
}
