//! Per-action resolution shared by the root action and its sub-actions

use crate::compose::{compose, is_compose, ComposeContext, RootBindings, RootView};
use crate::error::{RuntimeError, RuntimeResult};
use crate::template::StatementTemplate;
use cascade_core::{
    tree, ActionSpec, CoreError, OutSpec, QueryResult, ACTION_OVERRIDE_FIELD,
};
use cascade_provider::{
    ContextBinding, Credentials, Provider, ProviderConnection, ProviderError, ProviderResult,
    QueryOptions,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Field under which the session context is visible to statement templates
pub const TEMPLATE_CONTEXT_FIELD: &str = "__context";

/// A provider taking part in one execution, with its open connection
pub struct ProviderBinding {
    pub name: String,
    pub provider: Arc<dyn Provider>,
    pub credentials: Credentials,
    pub context: Vec<ContextBinding>,
    pub connection: Option<Box<dyn ProviderConnection>>,
}

impl std::fmt::Debug for ProviderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBinding")
            .field("name", &self.name)
            .field("kind", &self.provider.kind())
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

/// Connection-level operation applied to every binding at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SetContext,
    Begin,
    Commit,
    Rollback,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::SetContext => "set_context",
            Step::Begin => "start_transaction",
            Step::Commit => "commit",
            Step::Rollback => "rollback",
        }
    }
}

impl ProviderBinding {
    pub fn new(name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            name: name.into(),
            provider,
            credentials: Credentials::default(),
            context: Vec::new(),
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Run `step` on the open connection; bindings that never connected are skipped.
    pub async fn apply(&mut self, step: Step) -> ProviderResult<()> {
        let Some(connection) = self.connection.as_deref_mut() else {
            return Ok(());
        };
        match step {
            Step::SetContext => self.provider.set_context(connection, &self.context).await,
            Step::Begin => self.provider.start_transaction(connection).await,
            Step::Commit => self.provider.commit(connection).await,
            Step::Rollback => self.provider.rollback(connection).await,
        }
    }
}

/// What a single dispatch resolves to
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Broker(String),
    Func(String),
    Query(String),
    Nothing,
}

/// Resolves arguments, sends one action to its provider and writes `out` back
pub struct Dispatcher<'a> {
    bindings: &'a mut [ProviderBinding],
    session_context: &'a JsonValue,
    template: &'a dyn StatementTemplate,
    options: QueryOptions,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        bindings: &'a mut [ProviderBinding],
        session_context: &'a JsonValue,
        template: &'a dyn StatementTemplate,
        options: QueryOptions,
    ) -> Self {
        Self { bindings, session_context, template, options }
    }

    /// Dispatch `spec` for the node at `node_path` of `tree`.
    ///
    /// Returns the provider result reduced to its first record. `root` is
    /// present for sub-actions and makes `/path` operands resolvable.
    pub async fn run(
        &mut self,
        spec: ActionSpec<'_>,
        tree: &mut JsonValue,
        node_path: &str,
        root: Option<(&JsonValue, &RootBindings)>,
    ) -> RuntimeResult<QueryResult> {
        // the override is consumed by the first dispatch on the node
        let action_override = tree::get_mut(tree, node_path)
            .and_then(JsonValue::as_object_mut)
            .and_then(|node| node.remove(ACTION_OVERRIDE_FIELD))
            .and_then(|value| value.as_str().map(str::to_string));

        let args = {
            let live: &JsonValue = tree;
            let node = tree::get(live, node_path)
                .ok_or_else(|| CoreError::invalid_path(node_path, "node no longer exists"))?;
            let view = root.map(|(snapshot, bindings)| RootView { live, snapshot, bindings });
            self.resolve_args(spec, node, view)?
        };

        let target = self.target(spec, action_override.as_deref(), &args)?;
        let result = self.invoke(spec.provider, target, args).await?.into_first_record();

        if let Some(out) = spec.out {
            let node = tree::get_mut(tree, node_path)
                .ok_or_else(|| CoreError::invalid_path(node_path, "node no longer exists"))?;
            OutSpec::parse(out)?.apply(node, &result.data)?;
        }
        Ok(result)
    }

    /// Call arguments: the compose result, or a copy of the node
    fn resolve_args(
        &self,
        spec: ActionSpec<'_>,
        node: &JsonValue,
        root: Option<RootView<'_>>,
    ) -> RuntimeResult<JsonValue> {
        match spec.args {
            Some(expr) if is_compose(expr) => {
                let ctx = ComposeContext { session: self.session_context, node: Some(node), root };
                compose(expr, &ctx)
            }
            _ => Ok(node.clone()),
        }
    }

    fn target(
        &self,
        spec: ActionSpec<'_>,
        action_override: Option<&str>,
        args: &JsonValue,
    ) -> RuntimeResult<Target> {
        let name = action_override.or(spec.action).map(str::trim).unwrap_or_default();

        if spec.broker {
            if name.is_empty() {
                return Ok(Target::Nothing);
            }
            return Ok(Target::Broker(name.to_string()));
        }
        if !name.is_empty() {
            return Ok(Target::Func(name.to_string()));
        }

        match spec.text.map(str::trim) {
            Some(text) if !text.is_empty() => {
                let mut scope = args.clone();
                if let JsonValue::Object(map) = &mut scope {
                    map.insert(TEMPLATE_CONTEXT_FIELD.to_string(), self.session_context.clone());
                }
                Ok(Target::Query(self.template.render(text, &scope)?))
            }
            _ => Ok(Target::Nothing),
        }
    }

    async fn invoke(
        &mut self,
        provider_name: &str,
        target: Target,
        args: JsonValue,
    ) -> RuntimeResult<QueryResult> {
        if target == Target::Nothing {
            tracing::debug!(provider = %provider_name, "Nothing to dispatch");
            return Ok(QueryResult::empty());
        }

        let binding = self
            .bindings
            .iter_mut()
            .find(|b| b.name == provider_name)
            .ok_or_else(|| ProviderError::NotFound(provider_name.to_string()))?;
        let provider = binding.provider.clone();
        let connection = binding.connection.as_deref_mut().ok_or_else(|| {
            RuntimeError::Provider(ProviderError::connection(provider_name, "no open connection"))
        })?;

        let options = &self.options;
        let result = match &target {
            Target::Broker(action) => provider.broker(connection, action, &args, options).await,
            Target::Func(name) => provider.func(connection, name, &args, options).await,
            Target::Query(statement) => {
                provider.query(connection, statement, &args, options, None).await
            }
            Target::Nothing => Ok(QueryResult::empty()),
        };

        tracing::trace!(provider = %provider_name, target = ?target, ok = result.is_ok(), "Dispatched");
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::PlaceholderTemplate;
    use cascade_core::Action;
    use cascade_provider::{ConnectOptions, StubOp, StubProvider};
    use serde_json::json;

    async fn bound(stub: StubProvider) -> (Arc<StubProvider>, Vec<ProviderBinding>) {
        let stub = Arc::new(stub);
        let mut binding = ProviderBinding::new("default", stub.clone());
        binding.connection = Some(
            stub.connect(&Credentials::default(), &ConnectOptions::default())
                .await
                .unwrap(),
        );
        (stub, vec![binding])
    }

    #[tokio::test]
    async fn func_dispatch_writes_out() {
        let (stub, mut bindings) = bound(
            StubProvider::new("default")
                .respond("mdl.unit.add", QueryResult::rows(vec![json!({"id": 7}), json!({"id": 8})])),
        )
        .await;
        let action: Action = serde_json::from_value(json!({
            "attributes": {"action": "mdl.unit.add", "out": "id"}
        }))
        .unwrap();

        let ctx = json!({});
        let template = PlaceholderTemplate::new();
        let mut dispatcher =
            Dispatcher::new(&mut bindings, &ctx, &template, QueryOptions::default());
        let mut tree = json!({"name": "u1"});
        let result = dispatcher.run(action.spec(), &mut tree, "", None).await.unwrap();

        assert_eq!(result.data, json!({"id": 7}));
        assert_eq!(tree, json!({"name": "u1", "id": 7}));
        assert_eq!(stub.count(StubOp::Func), 1);
    }

    #[tokio::test]
    async fn override_field_replaces_action_name() {
        let (stub, mut bindings) = bound(StubProvider::new("default")).await;
        let action: Action = serde_json::from_value(json!({
            "attributes": {"action": "a.b.add", "broker": true}
        }))
        .unwrap();

        let ctx = json!({});
        let template = PlaceholderTemplate::new();
        let mut dispatcher =
            Dispatcher::new(&mut bindings, &ctx, &template, QueryOptions::default());
        let mut tree = json!({"$$action": "a.b.upd", "x": 1});
        dispatcher.run(action.spec(), &mut tree, "", None).await.unwrap();
        assert_eq!(tree, json!({"x": 1}));
        dispatcher.run(action.spec(), &mut tree, "", None).await.unwrap();

        let calls = stub.calls(StubOp::Broker);
        assert_eq!(calls[0].target.as_deref(), Some("a.b.upd"));
        assert_eq!(calls[0].params, json!({"x": 1}));
        assert_eq!(calls[1].target.as_deref(), Some("a.b.add"));
    }

    #[tokio::test]
    async fn query_text_is_templated_with_session_context() {
        let (stub, mut bindings) = bound(StubProvider::new("default")).await;
        let action: Action = serde_json::from_value(json!({
            "text": "  select * from t where org = {{__context.org}} and id = {{id}}  "
        }))
        .unwrap();

        let ctx = json!({"org": 3});
        let template = PlaceholderTemplate::new();
        let mut dispatcher =
            Dispatcher::new(&mut bindings, &ctx, &template, QueryOptions::default());
        let mut tree = json!({"id": 9});
        dispatcher.run(action.spec(), &mut tree, "", None).await.unwrap();

        let calls = stub.calls(StubOp::Query);
        assert_eq!(
            calls[0].target.as_deref(),
            Some("select * from t where org = 3 and id = 9")
        );
        assert_eq!(calls[0].params, json!({"id": 9}));
    }

    #[tokio::test]
    async fn nothing_to_dispatch() {
        let (stub, mut bindings) = bound(StubProvider::new("default")).await;
        let action = Action::default();

        let ctx = json!({});
        let template = PlaceholderTemplate::new();
        let mut dispatcher =
            Dispatcher::new(&mut bindings, &ctx, &template, QueryOptions::default());
        let mut tree = json!({});
        let result = dispatcher.run(action.spec(), &mut tree, "", None).await.unwrap();

        assert_eq!(result, QueryResult::empty());
        assert!(stub.journal().iter().all(|c| c.op == StubOp::Connect));
    }
}
