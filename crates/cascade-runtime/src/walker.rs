//! Depth-first traversal of the argument tree firing sub-actions
//!
//! At every path the walker visits each element in sequence order. For an
//! element it first dispatches the sub-actions registered at that exact path
//! whose filter accepts the element's `$action` marker, then descends into
//! every deeper path that carries sub-actions. Everything runs sequentially
//! on the connections the executor opened.

use crate::compose::RootBindings;
use crate::dispatch::Dispatcher;
use crate::error::RuntimeResult;
use cascade_core::{tree, SubAction, MUTATION_MARKER};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value as JsonValue};

/// Key under which nested walk results are collected
pub const CHILDS_KEY: &str = "_childs";

/// Marker used in result keys for elements without a `$action`
const EACH_MARKER: &str = "each";

pub struct Walker<'a> {
    dispatcher: Dispatcher<'a>,
    subs: Vec<&'a SubAction>,
    snapshot: JsonValue,
    bindings: RootBindings,
}

impl<'a> Walker<'a> {
    /// `subs` must already be in execution order; `snapshot` is the root data
    /// as it was once the root action finished.
    pub fn new(dispatcher: Dispatcher<'a>, subs: Vec<&'a SubAction>, snapshot: JsonValue) -> Self {
        Self { dispatcher, subs, snapshot, bindings: RootBindings::new() }
    }

    /// Walk the whole tree. Results are keyed `#<index>#<label>:<marker>`,
    /// nested levels under `_childs` keyed `<path>#<index>`.
    pub async fn run(&mut self, tree: &mut JsonValue) -> RuntimeResult<JsonValue> {
        self.walk(tree, String::new(), String::new()).await
    }

    fn walk<'s>(
        &'s mut self,
        tree: &'s mut JsonValue,
        deep_path: String,
        index_path: String,
    ) -> BoxFuture<'s, RuntimeResult<JsonValue>> {
        async move {
            let mut results = Map::new();

            let elements: Vec<String> = if deep_path.is_empty() {
                vec![String::new()]
            } else {
                match tree::get(tree, &index_path) {
                    Some(JsonValue::Array(items)) if !items.is_empty() => {
                        (0..items.len()).map(|i| tree::join(&index_path, &i.to_string())).collect()
                    }
                    Some(JsonValue::Object(_)) => vec![index_path.clone()],
                    _ => {
                        tracing::debug!(path = %deep_path, index_path = %index_path, "No elements to cascade into");
                        return Ok(JsonValue::Object(results));
                    }
                }
            };

            let here: Vec<&'a SubAction> =
                self.subs.iter().copied().filter(|sub| sub.path() == deep_path).collect();
            let mut children: Vec<String> = Vec::new();
            for sub in &self.subs {
                if let Some(child) = tree::immediate_child(&deep_path, sub.path()) {
                    if !children.iter().any(|c| c == child) {
                        children.push(child.to_string());
                    }
                }
            }

            let mut nested = Map::new();
            for (index, element_path) in elements.iter().enumerate() {
                let marker = tree::get(tree, element_path)
                    .and_then(|element| element.get(MUTATION_MARKER))
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);

                if !deep_path.is_empty() {
                    self.bindings.bind(&deep_path, element_path);
                }

                for sub in &here {
                    if !sub.attributes.filter.matches(marker.as_deref()) {
                        continue;
                    }
                    tracing::debug!(
                        path = %deep_path,
                        index = index,
                        sub_action = %sub.label(),
                        marker = marker.as_deref().unwrap_or(EACH_MARKER),
                        "Firing sub-action"
                    );
                    let result = self
                        .dispatcher
                        .run(sub.spec(), tree, element_path, Some((&self.snapshot, &self.bindings)))
                        .await?;

                    let key = format!(
                        "#{}#{}:{}",
                        index,
                        sub.label(),
                        marker.as_deref().unwrap_or(EACH_MARKER)
                    );
                    let entry = results.entry(key).or_insert_with(|| JsonValue::Array(Vec::new()));
                    if let JsonValue::Array(list) = entry {
                        list.push(serde_json::to_value(&result).unwrap_or(JsonValue::Null));
                    }
                }

                for child in &children {
                    let child_deep = tree::join(&deep_path, child);
                    let child_index = tree::join(element_path, child);
                    let child_results = self.walk(tree, child_deep.clone(), child_index).await?;
                    nested.insert(format!("{}#{}", child_deep, index), child_results);
                }
            }

            if !nested.is_empty() {
                results.insert(CHILDS_KEY.to_string(), JsonValue::Object(nested));
            }
            Ok(JsonValue::Object(results))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::dispatch::ProviderBinding;
    use crate::template::PlaceholderTemplate;
    use cascade_core::QueryResult;
    use cascade_provider::{ConnectOptions, Credentials, Provider, QueryOptions, StubOp, StubProvider};
    use serde_json::json;
    use std::sync::Arc;

    async fn walk(
        stub: StubProvider,
        definition: JsonValue,
        tree: &mut JsonValue,
    ) -> (Arc<StubProvider>, JsonValue) {
        let stub = Arc::new(stub);
        let mut binding = ProviderBinding::new("default", stub.clone());
        binding.connection = Some(
            stub.connect(&Credentials::default(), &ConnectOptions::default()).await.unwrap(),
        );
        let mut bindings = vec![binding];

        let action = compile(&definition).unwrap();
        let ctx = json!({});
        let template = PlaceholderTemplate::new();
        let dispatcher = Dispatcher::new(&mut bindings, &ctx, &template, QueryOptions::default());
        let mut walker = Walker::new(dispatcher, action.ordered_sub_actions(), tree.clone());
        let results = walker.run(tree).await.unwrap();
        (stub, results)
    }

    #[tokio::test]
    async fn fires_in_order_and_filters_by_marker() {
        let definition = json!({
            "@main": {"action": "unit.upd", "type": "func"},
            "lines": {
                "@add": {"action": "line.add", "type": "broker"},
                "@del": {"action": "line.del", "type": "broker"},
                "@each": {"action": "line.touch", "type": "func"}
            }
        });
        let mut tree = json!({"lines": [
            {"$action": "add", "n": 1},
            {"$action": "del", "n": 2},
            {"n": 3}
        ]});
        let (stub, results) = walk(StubProvider::new("default"), definition, &mut tree).await;

        let targets: Vec<String> = stub
            .journal()
            .into_iter()
            .filter(|c| matches!(c.op, StubOp::Func | StubOp::Broker))
            .filter_map(|c| c.target)
            .collect();
        assert_eq!(
            targets,
            vec!["line.touch", "line.add", "line.touch", "line.del", "line.touch"]
        );

        let lines = &results[CHILDS_KEY]["lines#0"];
        assert!(lines.get("#0#line.add:add").is_some());
        assert!(lines.get("#1#line.del:del").is_some());
        assert!(lines.get("#0#line.touch:add").is_some());
        assert!(lines.get("#2#line.touch:each").is_some());
        assert!(lines.get("#2#line.add:each").is_none());
    }

    #[tokio::test]
    async fn action_override_applies_to_one_dispatch() {
        let definition = json!({
            "lines": {
                "@add": [
                    {"action": "line.add", "type": "broker"},
                    {"action": "line_ext.add", "type": "broker"}
                ]
            }
        });
        let mut tree = json!({"lines": [
            {"$action": "add", "$$action": "custom.add", "n": 1},
            {"$action": "add", "n": 2}
        ]});
        let (stub, _) = walk(StubProvider::new("default"), definition, &mut tree).await;

        let calls = stub.calls(StubOp::Broker);
        let targets: Vec<&str> = calls.iter().filter_map(|c| c.target.as_deref()).collect();
        assert_eq!(targets, vec!["custom.add", "line_ext.add", "line.add", "line_ext.add"]);
        assert_eq!(calls[0].params, json!({"$action": "add", "n": 1}));
        assert!(tree["lines"][0].get("$$action").is_none());
    }

    #[tokio::test]
    async fn nested_ids_flow_down() {
        let definition = json!({
            "lines": {
                "@add": {"action": "line.add", "type": "broker", "out": "id"},
                "parts": {
                    "@add": {
                        "action": "part.add",
                        "type": "broker",
                        "args": {"line_id": "/lines.id", "...": "*"}
                    }
                }
            }
        });
        let mut tree = json!({"lines": [
            {"$action": "add", "parts": [{"$action": "add", "p": "a"}]},
            {"$action": "add", "parts": [{"$action": "add", "p": "b"}, {"$action": "add", "p": "c"}]}
        ]});

        let stub = StubProvider::new("default")
            .respond("line.add", QueryResult::rows(vec![json!({"id": 11})]))
            .respond("line.add", QueryResult::rows(vec![json!({"id": 12})]));
        let (stub, _) = walk(stub, definition, &mut tree).await;

        let parts: Vec<JsonValue> = stub
            .calls(StubOp::Broker)
            .into_iter()
            .filter(|c| c.target.as_deref() == Some("part.add"))
            .map(|c| c.params)
            .collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["line_id"], json!(11));
        assert_eq!(parts[1]["line_id"], json!(12));
        assert_eq!(parts[2]["line_id"], json!(12));
        assert_eq!(parts[2]["p"], json!("c"));
        assert_eq!(tree["lines"][1]["id"], json!(12));
    }

    #[tokio::test]
    async fn missing_and_empty_collections_are_skipped() {
        let definition = json!({
            "lines": {"@each": {"action": "line.touch", "type": "func"}}
        });
        let mut tree = json!({"lines": []});
        let (stub, results) = walk(StubProvider::new("default"), definition.clone(), &mut tree).await;
        assert_eq!(stub.count(StubOp::Func), 0);
        assert_eq!(results[CHILDS_KEY]["lines#0"], json!({}));

        let mut tree = json!({"other": 1});
        let (stub, _) = walk(StubProvider::new("default"), definition, &mut tree).await;
        assert_eq!(stub.count(StubOp::Func), 0);
    }

    #[tokio::test]
    async fn mapping_is_a_single_element() {
        let definition = json!({
            "header": {"@each": {"action": "header.save", "type": "func", "out": "saved"}}
        });
        let mut tree = json!({"header": {"title": "x"}});
        let stub = StubProvider::new("default")
            .respond("header.save", QueryResult::rows(vec![json!({"saved": true})]));
        let (stub, _) = walk(stub, definition, &mut tree).await;

        assert_eq!(stub.calls(StubOp::Func)[0].params, json!({"title": "x"}));
        assert_eq!(tree["header"]["saved"], json!(true));
    }
}
