//! The capability contract every data-source backend implements

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::session::{ContextBinding, Credentials};
use async_trait::async_trait;
use cascade_core::QueryResult;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;
use tokio_util::sync::CancellationToken;

/// Trait to enable downcasting for trait objects
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Open connection owned by exactly one provider binding
pub trait ProviderConnection: AsAny + Send {}

/// Downcast a connection handed back by the engine to the provider's own type
pub fn downcast_connection<'a, T: 'static>(
    connection: &'a mut dyn ProviderConnection,
    provider: &str,
) -> ProviderResult<&'a mut T> {
    connection
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| ProviderError::connection(provider, "connection belongs to another provider"))
}

/// Options passed to `Provider::connect`
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Free-form label of the call site, used for connection auditing
    pub connect_place: Option<String>,
}

/// Shape of returned rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowMode {
    /// One mapping per row keyed by column name
    #[default]
    Object,
    /// One sequence per row in column order
    Array,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub row_mode: RowMode,
    /// Append a `_rn` row number column
    pub return_rn: bool,
    pub connect_place: Option<String>,
    /// Session context of the caller, for providers that expose it to their scripts
    pub session_context: JsonValue,
    /// Cooperative cancellation; providers may abort in-flight work when fired
    pub cancellation: Option<CancellationToken>,
}

/// Requested ordering of a dataset column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySort {
    pub field: String,
    #[serde(default)]
    pub desc: bool,
}

/// Requested chunk of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRange {
    pub chunk_start: u64,
    #[serde(default)]
    pub amount: Option<u64>,
}

/// Transformations applied to a statement before execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryControl {
    #[serde(default)]
    pub sorts: Vec<QuerySort>,
    #[serde(default)]
    pub range: Option<QueryRange>,
}

impl QueryControl {
    pub fn is_empty(&self) -> bool {
        self.sorts.is_empty() && self.range.is_none()
    }
}

/// Data-source backend
///
/// Implementations override what their backend supports; transaction and
/// context hooks default to no-ops, `func` and `broker` to
/// `ProviderError::Unsupported`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    /// Provider type tag, used to filter session context bindings
    fn kind(&self) -> &str {
        &self.config().kind
    }

    fn config_credentials(&self) -> Credentials {
        self.config().config_credentials()
    }

    /// Open a connection. Must reject pool + session-credential configurations.
    async fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> ProviderResult<Box<dyn ProviderConnection>>;

    /// Push session variables onto the connection
    async fn set_context(
        &self,
        _connection: &mut dyn ProviderConnection,
        _bindings: &[ContextBinding],
    ) -> ProviderResult<()> {
        Ok(())
    }

    async fn query(
        &self,
        connection: &mut dyn ProviderConnection,
        statement: &str,
        params: &JsonValue,
        options: &QueryOptions,
        control: Option<&QueryControl>,
    ) -> ProviderResult<QueryResult>;

    async fn func(
        &self,
        _connection: &mut dyn ProviderConnection,
        _name: &str,
        _params: &JsonValue,
        _options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        Err(ProviderError::unsupported(self.name(), "func"))
    }

    /// Dynamic CRUD dispatch
    async fn broker(
        &self,
        _connection: &mut dyn ProviderConnection,
        _action: &str,
        _params: &JsonValue,
        _options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        Err(ProviderError::unsupported(self.name(), "broker"))
    }

    async fn start_transaction(&self, _connection: &mut dyn ProviderConnection) -> ProviderResult<()> {
        Ok(())
    }

    async fn commit(&self, _connection: &mut dyn ProviderConnection) -> ProviderResult<()> {
        Ok(())
    }

    async fn rollback(&self, _connection: &mut dyn ProviderConnection) -> ProviderResult<()> {
        Ok(())
    }

    /// Close or return the connection. Called with `None` when nothing was opened.
    async fn release(&self, _connection: Option<Box<dyn ProviderConnection>>) -> ProviderResult<()> {
        Ok(())
    }

    /// Human readable message for a failure; the raw message means "not translated".
    fn format_error(&self, error: &(dyn std::error::Error + 'static)) -> String {
        error.to_string()
    }
}

/// Walk an error chain looking for a backend error of type `E`
pub fn find_source<'a, E: std::error::Error + 'static>(
    error: &'a (dyn std::error::Error + 'static),
) -> Option<&'a E> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(found) = err.downcast_ref::<E>() {
            return Some(found);
        }
        current = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain(u32);
    impl ProviderConnection for Plain {}

    struct Other;
    impl ProviderConnection for Other {}

    #[test]
    fn downcast_to_owned_type() {
        let mut boxed: Box<dyn ProviderConnection> = Box::new(Plain(4));
        let plain = downcast_connection::<Plain>(boxed.as_mut(), "p").unwrap();
        plain.0 += 1;
        assert_eq!(downcast_connection::<Plain>(boxed.as_mut(), "p").unwrap().0, 5);

        let mut other: Box<dyn ProviderConnection> = Box::new(Other);
        let err = downcast_connection::<Plain>(other.as_mut(), "p").err().unwrap();
        assert!(matches!(err, ProviderError::Connection { .. }));
    }

    #[test]
    fn find_source_walks_the_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err = ProviderError::execution_with_source("db", "write failed", io);
        let found = find_source::<std::io::Error>(&err).unwrap();
        assert_eq!(found.to_string(), "disk");
        assert!(find_source::<std::fmt::Error>(&err).is_none());
    }
}
