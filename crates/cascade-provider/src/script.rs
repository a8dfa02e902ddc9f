//! In-process provider running registered async handlers

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    downcast_connection, ConnectOptions, Provider, ProviderConnection, QueryControl, QueryOptions,
};
use crate::session::Credentials;
use async_trait::async_trait;
use cascade_core::QueryResult;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

pub const SCRIPT_KIND: &str = "script";

/// Input of a script handler
#[derive(Debug, Clone)]
pub struct ScriptCall {
    pub params: JsonValue,
    /// Caller session context
    pub context: JsonValue,
}

type Handler = Arc<dyn Fn(ScriptCall) -> BoxFuture<'static, anyhow::Result<JsonValue>> + Send + Sync>;

#[derive(Debug)]
pub struct ScriptConnection;

impl ProviderConnection for ScriptConnection {}

pub struct ScriptProvider {
    config: ProviderConfig,
    handlers: HashMap<String, Handler>,
}

impl ScriptProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(ProviderConfig::new(name, SCRIPT_KIND))
    }

    pub fn with_config(config: ProviderConfig) -> Self {
        Self { config, handlers: HashMap::new() }
    }

    /// Register a handler under `name`
    pub fn handler<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ScriptCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JsonValue>> + Send + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(move |call| handler(call).boxed()));
        self
    }

    pub fn handler_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    async fn run(
        &self,
        connection: &mut dyn ProviderConnection,
        name: &str,
        params: &JsonValue,
        options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        downcast_connection::<ScriptConnection>(connection, self.name())?;
        let name = name.trim();
        let handler = self
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::execution(self.name(), format!("unknown script '{}'", name)))?;

        let call = ScriptCall { params: params.clone(), context: options.session_context.clone() };

        let started = Instant::now();
        let output = handler(call).await.map_err(|e| {
            ProviderError::execution_with_source(self.name(), format!("script '{}' failed", name), e)
        })?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(provider = %self.name(), script = %name, elapsed_ms, "Script finished");

        let rows = match output {
            JsonValue::Array(rows) => rows,
            other => vec![other],
        };
        Ok(QueryResult::rows(rows).with_debug(json!({"timing": {"provider": {"execute": elapsed_ms}}})))
    }
}

#[async_trait]
impl Provider for ScriptProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn connect(
        &self,
        _credentials: &Credentials,
        _options: &ConnectOptions,
    ) -> ProviderResult<Box<dyn ProviderConnection>> {
        self.config.validate_connect()?;
        Ok(Box::new(ScriptConnection))
    }

    async fn query(
        &self,
        connection: &mut dyn ProviderConnection,
        statement: &str,
        params: &JsonValue,
        options: &QueryOptions,
        _control: Option<&QueryControl>,
    ) -> ProviderResult<QueryResult> {
        self.run(connection, statement, params, options).await
    }

    async fn func(
        &self,
        connection: &mut dyn ProviderConnection,
        name: &str,
        params: &JsonValue,
        options: &QueryOptions,
    ) -> ProviderResult<QueryResult> {
        self.run(connection, name, params, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ScriptProvider {
        ScriptProvider::new("js")
            .handler("double", |call: ScriptCall| async move {
                let n = call.params["n"].as_i64().unwrap_or_default();
                Ok(json!({"n": n * 2}))
            })
            .handler("whoami", |call: ScriptCall| async move {
                Ok(json!([{"user": call.context["user"]}, {"user": null}]))
            })
            .handler("fail", |_call: ScriptCall| async move { Err(anyhow::anyhow!("bad input")) })
    }

    #[tokio::test]
    async fn scalar_results_are_wrapped() {
        let provider = provider();
        let mut conn = provider.connect(&Credentials::default(), &ConnectOptions::default()).await.unwrap();
        let result = provider
            .func(conn.as_mut(), "double", &json!({"n": 21}), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(result.data, json!([{"n": 42}]));
        assert!(result.debug.unwrap()["timing"]["provider"]["execute"].is_number());
    }

    #[tokio::test]
    async fn query_uses_trimmed_statement_and_session_context() {
        let provider = provider();
        let mut conn = provider.connect(&Credentials::default(), &ConnectOptions::default()).await.unwrap();
        let options = QueryOptions { session_context: json!({"user": "alice"}), ..Default::default() };
        let result = provider.query(conn.as_mut(), "  whoami\n", &json!({}), &options, None).await.unwrap();
        assert_eq!(result.data, json!([{"user": "alice"}, {"user": null}]));

        // arguments never stand in for the session context
        let params = json!({"__context": {"user": "mallory"}});
        let result = provider.func(conn.as_mut(), "whoami", &params, &options).await.unwrap();
        assert_eq!(result.data[0]["user"], "alice");
    }

    #[tokio::test]
    async fn errors_and_unsupported_broker() {
        let provider = provider();
        let mut conn = provider.connect(&Credentials::default(), &ConnectOptions::default()).await.unwrap();
        let options = QueryOptions::default();

        let err = provider.func(conn.as_mut(), "fail", &json!({}), &options).await.unwrap_err();
        assert!(err.to_string().contains("script 'fail' failed"));

        let err = provider.func(conn.as_mut(), "nope", &json!({}), &options).await.unwrap_err();
        assert!(matches!(err, ProviderError::Execution { .. }));

        let err = provider.broker(conn.as_mut(), "a.b.add", &json!({}), &options).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported { operation: "broker", .. }));
        assert_eq!(provider.handler_names(), vec!["double", "fail", "whoami"]);
    }
}
