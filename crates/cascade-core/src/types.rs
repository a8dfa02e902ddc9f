//! Compiled action model shared by the compiler, the walker and the executor

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Provider name used when an action does not declare one.
pub const DEFAULT_PROVIDER: &str = "default";

/// Element field carrying the client-side mutation marker (`add`, `upd`, `del`).
pub const MUTATION_MARKER: &str = "$action";

/// Argument field that overrides the action name for a single dispatch.
pub const ACTION_OVERRIDE_FIELD: &str = "$$action";

/// Attributes of the root action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionAttributes {
    /// Function or broker action name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Dispatch through the provider broker instead of a named function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Result fields written back into the arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    /// Diagnostic label of the endpoint this action was loaded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Attributes that never leave the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerAttributes {
    /// Compose expression evaluated against the session only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
}

/// Root unit of work plus its compiled sub-action list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default)]
    pub attributes: ActionAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_attributes: Option<ServerAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub on: Vec<SubAction>,
}

impl Action {
    pub fn spec(&self) -> ActionSpec<'_> {
        ActionSpec {
            action: self.attributes.action.as_deref(),
            broker: self.attributes.broker.unwrap_or(false),
            provider: self.attributes.provider.as_deref().unwrap_or(DEFAULT_PROVIDER),
            out: self.attributes.out.as_deref(),
            args: None,
            text: self.text.as_deref(),
            label: None,
        }
    }

    /// Distinct provider names touched by this action, root provider first.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(1 + self.on.len());
        let root = self.attributes.provider.as_deref().unwrap_or(DEFAULT_PROVIDER);
        names.push(root.to_string());
        for sub in &self.on {
            let name = sub.provider();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Sub-actions in ascending `order`, stable for equal values.
    pub fn ordered_sub_actions(&self) -> Vec<&SubAction> {
        let mut ordered: Vec<&SubAction> = self.on.iter().collect();
        ordered.sort_by_key(|sub| sub.attributes.order);
        ordered
    }

    pub fn server_args(&self) -> Option<&str> {
        self.server_attributes.as_ref().and_then(|s| s.args.as_deref())
    }
}

/// Mutation filter selecting which elements fire a sub-action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Each,
    Del,
    Upd,
    Add,
}

impl Filter {
    /// Ranking used when no explicit order is given (lowest runs first)
    pub fn priority(self) -> usize {
        match self {
            Filter::Each => 0,
            Filter::Del => 1,
            Filter::Upd => 2,
            Filter::Add => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Filter::Each => "each",
            Filter::Del => "del",
            Filter::Upd => "upd",
            Filter::Add => "add",
        }
    }

    /// Whether an element carrying `marker` triggers this filter
    pub fn matches(self, marker: Option<&str>) -> bool {
        match self {
            Filter::Each => true,
            other => marker == Some(other.as_str()),
        }
    }
}

impl FromStr for Filter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "each" => Ok(Filter::Each),
            "del" => Ok(Filter::Del),
            "upd" => Ok(Filter::Upd),
            "add" => Ok(Filter::Add),
            other => Err(CoreError::InvalidFilter(other.to_string())),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes of a sub-action scoped to a tree path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubActionAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<bool>,
    /// Dot-separated location in the argument tree
    #[serde(default)]
    pub path: String,
    pub filter: Filter,
    /// Compose expression deriving the call arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Label used in walker diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAction {
    pub attributes: SubActionAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl SubAction {
    pub fn path(&self) -> &str {
        &self.attributes.path
    }

    pub fn provider(&self) -> &str {
        self.attributes.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn label(&self) -> &str {
        self.attributes
            .id
            .as_deref()
            .or(self.attributes.action.as_deref())
            .unwrap_or("text")
    }

    pub fn spec(&self) -> ActionSpec<'_> {
        ActionSpec {
            action: self.attributes.action.as_deref(),
            broker: self.attributes.broker.unwrap_or(false),
            provider: self.provider(),
            out: self.attributes.out.as_deref(),
            args: self.attributes.args.as_deref(),
            text: self.text.as_deref(),
            label: Some(self.label()),
        }
    }
}

/// Borrowed view over the fields shared by actions and sub-actions
#[derive(Debug, Clone, Copy)]
pub struct ActionSpec<'a> {
    pub action: Option<&'a str>,
    pub broker: bool,
    pub provider: &'a str,
    pub out: Option<&'a str>,
    pub args: Option<&'a str>,
    pub text: Option<&'a str>,
    pub label: Option<&'a str>,
}

/// Column description returned by providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_sub_type: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self { name: name.into(), data_type: data_type.into(), data_sub_type: None }
    }
}

/// Provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub data: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<Vec<ColumnMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<JsonValue>,
}

impl QueryResult {
    pub fn new(data: JsonValue) -> Self {
        Self { data, meta_data: None, debug: None }
    }

    /// Result of a no-op action
    pub fn empty() -> Self {
        Self::new(JsonValue::Array(Vec::new()))
    }

    pub fn rows(rows: Vec<JsonValue>) -> Self {
        Self::new(JsonValue::Array(rows))
    }

    pub fn with_meta_data(mut self, meta_data: Vec<ColumnMeta>) -> Self {
        self.meta_data = Some(meta_data);
        self
    }

    pub fn with_debug(mut self, debug: JsonValue) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Reduce a multi-row result to its first row.
    pub fn into_first_record(mut self) -> Self {
        if let JsonValue::Array(rows) = &mut self.data {
            if !rows.is_empty() {
                self.data = rows.swap_remove(0);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sub(path: &str, filter: Filter, order: i64, provider: Option<&str>) -> SubAction {
        SubAction {
            attributes: SubActionAttributes {
                action: Some(format!("{}.{}", path, filter)),
                broker: None,
                path: path.to_string(),
                filter,
                args: None,
                order,
                out: None,
                provider: provider.map(str::to_string),
                id: None,
            },
            text: None,
        }
    }

    #[test]
    fn filter_parsing_and_matching() {
        assert_eq!("add".parse::<Filter>().unwrap(), Filter::Add);
        assert_eq!(" del ".parse::<Filter>().unwrap(), Filter::Del);
        assert!("main".parse::<Filter>().is_err());

        assert!(Filter::Each.matches(None));
        assert!(Filter::Each.matches(Some("upd")));
        assert!(Filter::Add.matches(Some("add")));
        assert!(!Filter::Add.matches(Some("del")));
        assert!(!Filter::Del.matches(None));
    }

    #[test]
    fn provider_names_are_distinct_root_first() {
        let action = Action {
            attributes: ActionAttributes { provider: Some("main".into()), ..Default::default() },
            on: vec![
                sub("a", Filter::Add, 0, None),
                sub("a", Filter::Del, 1, Some("main")),
                sub("b", Filter::Add, 2, Some("audit")),
                sub("b", Filter::Upd, 3, None),
            ],
            ..Default::default()
        };
        assert_eq!(action.provider_names(), vec!["main", "default", "audit"]);

        let bare = Action::default();
        assert_eq!(bare.provider_names(), vec![DEFAULT_PROVIDER]);
    }

    #[test]
    fn ordered_sub_actions_is_stable() {
        let action = Action {
            on: vec![
                sub("x", Filter::Add, 2, None),
                sub("y", Filter::Add, 1, None),
                sub("z", Filter::Add, 1, None),
            ],
            ..Default::default()
        };
        let paths: Vec<&str> = action.ordered_sub_actions().iter().map(|s| s.path()).collect();
        assert_eq!(paths, vec!["y", "z", "x"]);
    }

    #[test]
    fn first_record_reduction() {
        let result = QueryResult::rows(vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
        assert_eq!(result.into_first_record().data, json!({"id": 1}));

        let empty = QueryResult::empty().into_first_record();
        assert_eq!(empty.data, json!([]));

        let record = QueryResult::new(json!({"id": 9})).into_first_record();
        assert_eq!(record.data, json!({"id": 9}));
    }

    #[test]
    fn action_deserializes_from_compiled_form() {
        let action: Action = serde_json::from_value(json!({
            "attributes": {"action": "mdl.unit.add", "broker": true, "out": "id"},
            "serverAttributes": {"args": "_compose('org',@org)"},
            "on": [{
                "attributes": {"path": "lines", "filter": "add", "order": 0, "action": "mdl.line.add"}
            }]
        }))
        .unwrap();
        assert!(action.spec().broker);
        assert_eq!(action.server_args(), Some("_compose('org',@org)"));
        assert_eq!(action.on[0].attributes.filter, Filter::Add);
        assert_eq!(action.on[0].provider(), DEFAULT_PROVIDER);
    }
}
