//! In-memory provider with canned responses, used by tests and dry runs

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    downcast_connection, ConnectOptions, Provider, ProviderConnection, QueryControl, QueryOptions,
    RowMode,
};
use crate::session::{ContextBinding, Credentials};
use async_trait::async_trait;
use cascade_core::{ColumnMeta, QueryResult};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const STUB_KIND: &str = "test";

/// Provider operation, as recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubOp {
    Connect,
    SetContext,
    Query,
    Func,
    Broker,
    StartTransaction,
    Commit,
    Rollback,
    Release,
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq)]
pub struct StubCall {
    pub op: StubOp,
    pub connection: Option<u64>,
    /// Statement, function name or broker action
    pub target: Option<String>,
    pub params: JsonValue,
}

type Responder = Arc<dyn Fn(&JsonValue) -> ProviderResult<QueryResult> + Send + Sync>;
type Translator = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> Option<String> + Send + Sync>;

#[derive(Default)]
struct StubState {
    /// Queued responses per target; the last one stays
    responses: HashMap<String, VecDeque<Responder>>,
    target_failures: HashMap<String, String>,
    step_failures: HashMap<StubOp, String>,
    journal: Vec<StubCall>,
}

/// Connection handed out by [`StubProvider`]
#[derive(Debug)]
pub struct StubConnection {
    pub id: u64,
}

impl ProviderConnection for StubConnection {}

pub struct StubProvider {
    config: ProviderConfig,
    next_id: AtomicU64,
    translator: Option<Translator>,
    state: Mutex<StubState>,
}

impl StubProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(ProviderConfig::new(name, STUB_KIND))
    }

    pub fn with_config(config: ProviderConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            translator: None,
            state: Mutex::new(StubState::default()),
        }
    }

    /// Queue a fixed result for a statement, function or broker action
    pub fn respond(self, target: impl Into<String>, result: QueryResult) -> Self {
        self.respond_with(target, move |_| Ok(result.clone()))
    }

    /// Queue a computed result; the closure receives the call parameters
    pub fn respond_with<F>(mut self, target: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&JsonValue) -> ProviderResult<QueryResult> + Send + Sync + 'static,
    {
        self.state
            .get_mut()
            .responses
            .entry(target.into())
            .or_default()
            .push_back(Arc::new(responder));
        self
    }

    /// Fail every call addressed to `target`
    pub fn fail_on(mut self, target: impl Into<String>, message: impl Into<String>) -> Self {
        self.state.get_mut().target_failures.insert(target.into(), message.into());
        self
    }

    /// Fail a lifecycle step (connect, commit, ...)
    pub fn fail_at(mut self, op: StubOp, message: impl Into<String>) -> Self {
        self.state.get_mut().step_failures.insert(op, message.into());
        self
    }

    /// Install an error translator used by `format_error`
    pub fn translate_errors<F>(mut self, translator: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) -> Option<String> + Send + Sync + 'static,
    {
        self.translator = Some(Arc::new(translator));
        self
    }

    pub fn journal(&self) -> Vec<StubCall> {
        self.state.lock().journal.clone()
    }

    /// Recorded calls of one kind
    pub fn calls(&self, op: StubOp) -> Vec<StubCall> {
        self.state.lock().journal.iter().filter(|c| c.op == op).cloned().collect()
    }

    pub fn count(&self, op: StubOp) -> usize {
        self.state.lock().journal.iter().filter(|c| c.op == op).count()
    }

    fn record(&self, op: StubOp, connection: Option<u64>, target: Option<&str>, params: JsonValue) {
        self.state.lock().journal.push(StubCall {
            op,
            connection,
            target: target.map(str::to_string),
            params,
        });
    }

    fn check_step(&self, op: StubOp) -> ProviderResult<()> {
        match self.state.lock().step_failures.get(&op) {
            Some(message) => Err(ProviderError::execution(self.name(), message.clone())),
            None => Ok(()),
        }
    }

    fn connection_id(&self, connection: &mut dyn ProviderConnection) -> ProviderResult<u64> {
        Ok(downcast_connection::<StubConnection>(connection, self.name())?.id)
    }

    /// Shared body of query/func/broker
    fn respond_to(
        &self,
        op: StubOp,
        connection: &mut dyn ProviderConnection,
        target: &str,
        params: &JsonValue,
        options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        let id = self.connection_id(connection)?;
        self.record(op, Some(id), Some(target), params.clone());

        if options.cancellation.as_ref().is_some_and(|token| token.is_cancelled()) {
            return Err(ProviderError::execution(self.name(), "request was cancelled"));
        }
        self.check_step(op)?;

        let responder = {
            let mut state = self.state.lock();
            if let Some(message) = state.target_failures.get(target) {
                return Err(ProviderError::execution(self.name(), message.clone()));
            }
            state.responses.get_mut(target).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
        };

        match responder {
            Some(responder) => responder(params),
            None => Ok(default_result(options)),
        }
    }
}

/// Fixed sample row in the requested row mode
fn default_result(options: &QueryOptions) -> QueryResult {
    let date = chrono::Utc::now().to_rfc3339();
    let mut meta_data = vec![
        ColumnMeta::new("text", "text"),
        ColumnMeta::new("numb", "numb"),
        ColumnMeta::new("bool", "bool"),
        ColumnMeta { data_sub_type: Some("date".to_string()), ..ColumnMeta::new("date", "date") },
    ];

    let mut row = match options.row_mode {
        RowMode::Array => json!(["foo", 1, true, date]),
        RowMode::Object => json!({"text": "foo", "numb": 1, "bool": true, "date": date}),
    };
    if options.return_rn {
        match &mut row {
            JsonValue::Array(cells) => cells.push(json!(1)),
            JsonValue::Object(fields) => {
                fields.insert("_rn".to_string(), json!(1));
            }
            _ => {}
        }
        meta_data.push(ColumnMeta::new("_rn", "numb"));
    }

    QueryResult::rows(vec![row]).with_meta_data(meta_data)
}

#[async_trait]
impl Provider for StubProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> ProviderResult<Box<dyn ProviderConnection>> {
        self.config.validate_connect()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.record(
            StubOp::Connect,
            Some(id),
            options.connect_place.as_deref(),
            json!({"user": credentials.user}),
        );
        if let Some(message) = self.state.lock().step_failures.get(&StubOp::Connect) {
            return Err(ProviderError::connection(self.name(), message.clone()));
        }
        Ok(Box::new(StubConnection { id }))
    }

    async fn set_context(
        &self,
        connection: &mut dyn ProviderConnection,
        bindings: &[ContextBinding],
    ) -> ProviderResult<()> {
        let id = self.connection_id(connection)?;
        let params = serde_json::to_value(bindings)
            .map_err(|e| ProviderError::execution_with_source(self.name(), "invalid context", e))?;
        self.record(StubOp::SetContext, Some(id), None, params);
        self.check_step(StubOp::SetContext)
            .map_err(|e| ProviderError::connection(self.name(), e.to_string()))
    }

    async fn query(
        &self,
        connection: &mut dyn ProviderConnection,
        statement: &str,
        params: &JsonValue,
        options: &QueryOptions,
        _control: Option<&QueryControl>,
    ) -> ProviderResult<QueryResult> {
        self.respond_to(StubOp::Query, connection, statement, params, options)
    }

    async fn func(
        &self,
        connection: &mut dyn ProviderConnection,
        name: &str,
        params: &JsonValue,
        options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        self.respond_to(StubOp::Func, connection, name, params, options)
    }

    async fn broker(
        &self,
        connection: &mut dyn ProviderConnection,
        action: &str,
        params: &JsonValue,
        options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        self.respond_to(StubOp::Broker, connection, action, params, options)
    }

    async fn start_transaction(&self, connection: &mut dyn ProviderConnection) -> ProviderResult<()> {
        let id = self.connection_id(connection)?;
        self.record(StubOp::StartTransaction, Some(id), None, JsonValue::Null);
        self.check_step(StubOp::StartTransaction)
    }

    async fn commit(&self, connection: &mut dyn ProviderConnection) -> ProviderResult<()> {
        let id = self.connection_id(connection)?;
        self.record(StubOp::Commit, Some(id), None, JsonValue::Null);
        self.check_step(StubOp::Commit)
    }

    async fn rollback(&self, connection: &mut dyn ProviderConnection) -> ProviderResult<()> {
        let id = self.connection_id(connection)?;
        self.record(StubOp::Rollback, Some(id), None, JsonValue::Null);
        self.check_step(StubOp::Rollback)
    }

    async fn release(&self, connection: Option<Box<dyn ProviderConnection>>) -> ProviderResult<()> {
        let id = match connection {
            Some(mut connection) => Some(self.connection_id(connection.as_mut())?),
            None => None,
        };
        self.record(StubOp::Release, id, None, JsonValue::Null);
        self.check_step(StubOp::Release)
    }

    fn format_error(&self, error: &(dyn std::error::Error + 'static)) -> String {
        self.translator
            .as_ref()
            .and_then(|translate| translate(error))
            .unwrap_or_else(|| error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectType, CredentialsSource};
    use tokio_util::sync::CancellationToken;

    async fn open(provider: &StubProvider) -> Box<dyn ProviderConnection> {
        provider.connect(&Credentials::default(), &ConnectOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn default_row_follows_row_mode() {
        let provider = StubProvider::new("default");
        let mut conn = open(&provider).await;

        let object = provider
            .query(conn.as_mut(), "select 1", &json!({}), &QueryOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(object.data[0]["text"], "foo");
        assert_eq!(object.data[0]["numb"], 1);
        assert_eq!(object.meta_data.as_ref().unwrap().len(), 4);

        let options = QueryOptions { row_mode: RowMode::Array, return_rn: true, ..Default::default() };
        let array = provider.query(conn.as_mut(), "select 1", &json!({}), &options, None).await.unwrap();
        let row = array.data[0].as_array().unwrap();
        assert_eq!(row.len(), 5);
        assert_eq!(row[4], 1);
        assert_eq!(array.meta_data.unwrap()[4].name, "_rn");
    }

    #[tokio::test]
    async fn queued_responses_keep_the_last_one() {
        let provider = StubProvider::new("default")
            .respond("mdl.unit.add", QueryResult::rows(vec![json!({"id": 1})]))
            .respond("mdl.unit.add", QueryResult::rows(vec![json!({"id": 2})]))
            .respond_with("echo", |params| Ok(QueryResult::rows(vec![params.clone()])));
        let mut conn = open(&provider).await;
        let options = QueryOptions::default();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let result = provider.func(conn.as_mut(), "mdl.unit.add", &json!({}), &options).await.unwrap();
            ids.push(result.data[0]["id"].clone());
        }
        assert_eq!(ids, vec![json!(1), json!(2), json!(2)]);

        let echoed = provider.broker(conn.as_mut(), "echo", &json!({"a": 1}), &options).await.unwrap();
        assert_eq!(echoed.data, json!([{"a": 1}]));
        assert_eq!(provider.count(StubOp::Func), 3);
        assert_eq!(provider.calls(StubOp::Broker)[0].target.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn failures_and_translation() {
        let provider = StubProvider::new("default")
            .fail_on("boom", "exploded")
            .fail_at(StubOp::Commit, "commit refused")
            .translate_errors(|e| e.to_string().contains("exploded").then(|| "translated".to_string()));
        let mut conn = open(&provider).await;

        let err = provider
            .func(conn.as_mut(), "boom", &json!({}), &QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(provider.format_error(&err), "translated");

        let err = provider.commit(conn.as_mut()).await.unwrap_err();
        assert_eq!(provider.format_error(&err), err.to_string());
    }

    #[tokio::test]
    async fn connect_rejects_pool_with_session_credentials() {
        let provider = StubProvider::with_config(
            ProviderConfig::new("default", STUB_KIND)
                .with_connect_type(ConnectType::Pool)
                .with_credentials_source(CredentialsSource::Session),
        );
        let err = provider
            .connect(&Credentials::default(), &ConnectOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Config(_)));
        assert!(provider.journal().is_empty());
    }

    #[tokio::test]
    async fn cancelled_requests_fail() {
        let provider = StubProvider::new("default");
        let mut conn = open(&provider).await;
        let token = CancellationToken::new();
        token.cancel();
        let options = QueryOptions { cancellation: Some(token), ..Default::default() };
        assert!(provider.query(conn.as_mut(), "select 1", &json!({}), &options, None).await.is_err());
    }

    #[tokio::test]
    async fn release_tolerates_missing_connection() {
        let provider = StubProvider::new("default");
        let conn = open(&provider).await;
        provider.release(Some(conn)).await.unwrap();
        provider.release(None).await.unwrap();

        let releases = provider.calls(StubOp::Release);
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].connection, Some(1));
        assert_eq!(releases[1].connection, None);
    }
}
