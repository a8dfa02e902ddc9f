//! Transactional execution of a compiled action across its providers

use crate::compose::{compose, is_compose, ComposeContext};
use crate::dispatch::{Dispatcher, ProviderBinding, Step};
use crate::error::{RuntimeError, RuntimeResult};
use crate::template::{PlaceholderTemplate, StatementTemplate};
use crate::walker::Walker;
use cascade_core::{redact_json_value, Action, QueryResult};
use cascade_provider::{
    ConnectOptions, ProviderRegistry, ProviderResult, QueryOptions, RowMode, Session,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-call execution options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Label of the call site, forwarded to providers for connection auditing
    pub connect_place: Option<String>,
    pub cancellation: Option<CancellationToken>,
    /// Attach phase timings and sub-action results to the response
    pub diagnostics: bool,
}

impl ExecuteOptions {
    pub fn with_connect_place(mut self, place: impl Into<String>) -> Self {
        self.connect_place = Some(place.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }
}

/// Outcome of an execution: `data` on success, `error` on failure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<JsonValue>,
}

impl ActionResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failure(message: impl Into<String>) -> Self {
        Self { data: None, error: Some(message.into()), debug: None }
    }
}

/// Phase durations in milliseconds
#[derive(Debug, Default)]
struct Timings {
    phases: Map<String, JsonValue>,
}

impl Timings {
    fn record(&mut self, phase: &str, since: Instant) {
        let ms = since.elapsed().as_secs_f64() * 1000.0;
        self.phases.insert(phase.to_string(), json!(ms));
    }
}

/// Runs actions against the providers of a registry
#[derive(Clone)]
pub struct Executor {
    registry: Arc<ProviderRegistry>,
    template: Arc<dyn StatementTemplate>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("registry", &self.registry).finish()
    }
}

impl Executor {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self::with_registry(Arc::new(registry))
    }

    pub fn with_registry(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry, template: Arc::new(PlaceholderTemplate::new()) }
    }

    /// Replace the statement renderer used for query text
    pub fn with_template(mut self, template: impl StatementTemplate + 'static) -> Self {
        self.template = Arc::new(template);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Execute `action` with `args` on behalf of `session`.
    ///
    /// Every provider the action touches gets one connection and one
    /// transaction. Failures never escape: they roll back every opened
    /// connection and come back as `error`. `args` is never modified.
    pub async fn execute(
        &self,
        action: &Action,
        args: &JsonValue,
        session: &dyn Session,
        options: ExecuteOptions,
    ) -> ActionResponse {
        let started = Instant::now();
        let mut timings = Timings::default();
        let session_context = session.context();

        let mut tree = match args {
            JsonValue::Null => JsonValue::Object(Map::new()),
            other => other.clone(),
        };
        if let Err(err) = merge_server_args(action, &mut tree, &session_context) {
            tracing::warn!(error = %err, "Server arguments could not be composed");
            return ActionResponse::failure(err.to_string());
        }

        let mut bindings = Vec::new();
        for name in action.provider_names() {
            match self.registry.get(&name) {
                Ok(provider) => bindings.push(ProviderBinding::new(name, provider)),
                Err(err) => return ActionResponse::failure(err.to_string()),
            }
        }

        tracing::debug!(
            endpoint = action.attributes.endpoint.as_deref().unwrap_or_default(),
            providers = ?bindings.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
            sub_actions = action.on.len(),
            "Executing action"
        );
        let outcome = self
            .run(action, &mut tree, session, &session_context, &options, &mut bindings, &mut timings)
            .await;

        let response = match outcome {
            Ok((root, walked)) => {
                timings.record("all", started);
                let data = match root.data {
                    JsonValue::Object(record) => JsonValue::Object(record),
                    _ => JsonValue::Object(Map::new()),
                };
                let debug = options.diagnostics.then(|| diagnostics(&timings, root.debug, walked));
                ActionResponse { data: Some(data), error: None, debug }
            }
            Err(err) => {
                rollback(&mut bindings).await;
                timings.record("all", started);
                let message = translate_error(&err, &bindings);
                tracing::info!(error = %message, "Action rolled back");
                let debug = options.diagnostics.then(|| diagnostics(&timings, None, None));
                ActionResponse { data: None, error: Some(message), debug }
            }
        };

        release(&mut bindings).await;
        response
    }

    /// [`Executor::execute`] followed by an audit event with sanitized inputs
    pub async fn execute_logged(
        &self,
        action: &Action,
        args: &JsonValue,
        session: &dyn Session,
        options: ExecuteOptions,
    ) -> ActionResponse {
        let response = self.execute(action, args, session, options).await;

        let endpoint = action.attributes.endpoint.as_deref().unwrap_or_default();
        let action_name = action.attributes.action.as_deref().unwrap_or_default();
        let logged_args = if action.attributes.action.is_some() {
            json!({"id": args.get("id").cloned().unwrap_or(JsonValue::Null), "other": "hidden"})
        } else {
            redact_json_value(args)
        };
        let mut context = session.context();
        if let JsonValue::Object(map) = &mut context {
            map.remove("password");
        }
        let context = redact_json_value(&context);

        match (&response.error, &response.data) {
            (Some(error), _) => tracing::info!(
                target: "cascade::audit",
                endpoint = %endpoint,
                action = %action_name,
                args = %logged_args,
                session = %context,
                error = %error,
                "Action failed"
            ),
            (None, data) => tracing::info!(
                target: "cascade::audit",
                endpoint = %endpoint,
                action = %action_name,
                args = %logged_args,
                session = %context,
                result_id = %data.as_ref().and_then(|d| d.get("id")).cloned().unwrap_or(JsonValue::Null),
                "Action executed"
            ),
        }
        response
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        action: &Action,
        tree: &mut JsonValue,
        session: &dyn Session,
        session_context: &JsonValue,
        options: &ExecuteOptions,
        bindings: &mut [ProviderBinding],
        timings: &mut Timings,
    ) -> RuntimeResult<(QueryResult, Option<JsonValue>)> {
        let phase = Instant::now();
        connect(bindings, session, options).await?;
        timings.record("connect", phase);

        let phase = Instant::now();
        first_error(apply_all(bindings, Step::SetContext).await)?;
        timings.record("context", phase);

        let phase = Instant::now();
        first_error(apply_all(bindings, Step::Begin).await)?;
        timings.record("transactStart", phase);

        let phase = Instant::now();
        let query_options = QueryOptions {
            row_mode: RowMode::Object,
            return_rn: false,
            connect_place: options.connect_place.clone(),
            session_context: session_context.clone(),
            cancellation: options.cancellation.clone(),
        };
        let mut dispatcher =
            Dispatcher::new(bindings, session_context, self.template.as_ref(), query_options);
        let root = dispatcher.run(action.spec(), tree, "", None).await?;

        let walked = if action.on.is_empty() {
            None
        } else {
            let snapshot = tree.clone();
            let mut walker = Walker::new(dispatcher, action.ordered_sub_actions(), snapshot);
            Some(walker.run(tree).await?)
        };
        timings.record("execute", phase);

        let phase = Instant::now();
        commit(bindings).await?;
        timings.record("commit", phase);

        Ok((root, walked))
    }
}

fn merge_server_args(
    action: &Action,
    tree: &mut JsonValue,
    session_context: &JsonValue,
) -> RuntimeResult<()> {
    let Some(expr) = action.server_args() else {
        return Ok(());
    };
    if !is_compose(expr) {
        return Err(RuntimeError::composition(format!(
            "server arguments must be a compose expression: '{}'",
            expr
        )));
    }

    let extra = compose(expr, &ComposeContext::session_only(session_context))?;
    if let (JsonValue::Object(target), JsonValue::Object(extra)) = (tree, extra) {
        target.extend(extra);
    }
    Ok(())
}

/// Resolve credentials and context, then open every connection concurrently.
/// Connections that did open are kept so they can be rolled back and released.
async fn connect(
    bindings: &mut [ProviderBinding],
    session: &dyn Session,
    options: &ExecuteOptions,
) -> ProviderResult<()> {
    for binding in bindings.iter_mut() {
        binding.credentials = session.credentials(binding.provider.as_ref());
        binding.context = session.provider_context(binding.provider.as_ref());
    }

    let connect_options = ConnectOptions { connect_place: options.connect_place.clone() };
    let opened = join_all(
        bindings.iter().map(|b| b.provider.connect(&b.credentials, &connect_options)),
    )
    .await;

    let mut failure = None;
    for (binding, result) in bindings.iter_mut().zip(opened) {
        match result {
            Ok(connection) => {
                tracing::debug!(provider = %binding.name, "Connection opened");
                binding.connection = Some(connection);
            }
            Err(err) => {
                tracing::debug!(provider = %binding.name, error = %err, "Connection failed");
                failure.get_or_insert(err);
            }
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn apply_all(bindings: &mut [ProviderBinding], step: Step) -> Vec<ProviderResult<()>> {
    join_all(bindings.iter_mut().map(|b| b.apply(step))).await
}

fn first_error(results: Vec<ProviderResult<()>>) -> ProviderResult<()> {
    results.into_iter().collect()
}

async fn commit(bindings: &mut [ProviderBinding]) -> ProviderResult<()> {
    let results = apply_all(bindings, Step::Commit).await;
    if results.iter().any(Result::is_err) {
        let committed: Vec<&str> = bindings
            .iter()
            .zip(&results)
            .filter(|(b, r)| b.is_connected() && r.is_ok())
            .map(|(b, _)| b.name.as_str())
            .collect();
        if !committed.is_empty() {
            tracing::error!(committed = ?committed, "Partial commit: some providers committed before a failure");
        }
    }
    first_error(results)
}

async fn rollback(bindings: &mut [ProviderBinding]) {
    let results = apply_all(bindings, Step::Rollback).await;
    for (binding, result) in bindings.iter().zip(results) {
        if let Err(err) = result {
            tracing::warn!(provider = %binding.name, error = %err, "Rollback failed");
        }
    }
}

async fn release(bindings: &mut [ProviderBinding]) {
    let results = join_all(
        bindings.iter_mut().map(|b| b.provider.release(b.connection.take())),
    )
    .await;
    for (binding, result) in bindings.iter().zip(results) {
        if let Err(err) = result {
            tracing::warn!(provider = %binding.name, error = %err, "Release failed");
        }
    }
}

/// Ask every provider, in binding order, for a readable message. The first
/// one that differs from the raw message wins.
fn translate_error(err: &RuntimeError, bindings: &[ProviderBinding]) -> String {
    let raw = err.to_string();
    let source: &(dyn std::error::Error + 'static) = match err {
        RuntimeError::Provider(inner) => inner,
        other => other,
    };
    bindings
        .iter()
        .map(|b| b.provider.format_error(source))
        .find(|message| *message != raw)
        .unwrap_or(raw)
}

fn diagnostics(
    timings: &Timings,
    provider_debug: Option<JsonValue>,
    walked: Option<JsonValue>,
) -> JsonValue {
    let mut timing = Map::new();
    timing.insert("back".to_string(), JsonValue::Object(timings.phases.clone()));
    if let Some(JsonValue::Object(debug)) = provider_debug {
        if let Some(JsonValue::Object(provider)) = debug.get("timing") {
            timing.extend(provider.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    let mut debug = Map::new();
    debug.insert("timing".to_string(), JsonValue::Object(timing));
    if let Some(JsonValue::Object(walked)) = walked {
        debug.extend(walked);
    }
    JsonValue::Object(debug)
}

