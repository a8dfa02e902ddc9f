//! Compiles declarative nested action definitions into an [`Action`]
//!
//! A definition is a mapping. Keys starting with `@` are reserved: `@main` at
//! the root describes the action itself, `@<filters>` (for example `@add` or
//! `@upd;each`) holds one definition or a list of them fired on the elements
//! at the current path. Every other key descends one level into the argument
//! tree.
//!
//! ```yaml
//! "@main": { action: mdl.unit.add, type: broker, out: id }
//! lines:
//!   "@add": { action: mdl.line.add, type: broker, args: { pid: /id, "...": "*" } }
//! ```

use crate::compose::COMPOSE_MARKER;
use crate::error::{RuntimeError, RuntimeResult};
use cascade_core::{
    tree, Action, ActionAttributes, Filter, ServerAttributes, SubAction, SubActionAttributes,
};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

pub const MAIN_KEY: &str = "@main";
pub const RESERVED_PREFIX: char = '@';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DispatchType {
    Query,
    Func,
    Broker,
}

/// One raw definition under a reserved key
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDefinition {
    #[serde(default)]
    action: Option<String>,
    #[serde(default, rename = "type")]
    dispatch: Option<DispatchType>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    args: Option<Map<String, JsonValue>>,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default)]
    out: Option<String>,
    #[serde(default)]
    server_args: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// Fields of a definition after resolving its dispatch type
struct Dispatch {
    action: Option<String>,
    broker: Option<bool>,
    text: Option<String>,
}

impl RawDefinition {
    fn parse(value: &JsonValue, path: &str) -> RuntimeResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            RuntimeError::compile(format!("invalid definition at '{}': {}", display_path(path), e))
        })
    }

    fn dispatch(&self, path: &str) -> RuntimeResult<Dispatch> {
        let action = self.action.clone();
        Ok(match (self.dispatch, self.action.as_deref()) {
            (Some(DispatchType::Query), _) => Dispatch { action: None, broker: None, text: action },
            (Some(DispatchType::Func), _) => Dispatch { action, broker: Some(false), text: None },
            (Some(DispatchType::Broker), _) => Dispatch { action, broker: Some(true), text: None },
            (None, Some(name)) => {
                return Err(RuntimeError::compile(format!(
                    "definition '{}' at '{}' has no type (query, func or broker)",
                    name,
                    display_path(path)
                )))
            }
            (None, None) => Dispatch { action: None, broker: None, text: None },
        })
    }

    /// `args` as a compose expression over the declared sources
    fn compose_args(&self) -> Option<String> {
        let args = self.args.as_ref().filter(|a| !a.is_empty())?;
        let targets: Vec<String> = args.keys().map(|k| k.replace('\'', "\\'")).collect();
        let sources: Vec<String> = args
            .values()
            .map(|v| match v {
                JsonValue::String(expr) => expr.clone(),
                other => other.to_string(),
            })
            .collect();
        Some(format!("{}('{}', {})", COMPOSE_MARKER, targets.join(";"), sources.join(", ")))
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

/// Compile a declarative definition
pub fn compile(definition: &JsonValue) -> RuntimeResult<Action> {
    let root = definition
        .as_object()
        .ok_or_else(|| RuntimeError::compile("action definition must be a mapping"))?;

    let mut action = Action::default();
    if let Some(main) = root.get(MAIN_KEY) {
        apply_main(&mut action, main)?;
    }

    let mut next_order = 0i64;
    compile_level(root, "", &mut action.on, &mut next_order)?;
    tracing::debug!(sub_actions = action.on.len(), "Compiled action definition");
    Ok(action)
}

fn apply_main(action: &mut Action, main: &JsonValue) -> RuntimeResult<()> {
    let main = match main {
        JsonValue::Array(items) if items.len() > 1 => {
            return Err(RuntimeError::compile(format!(
                "'{}' holds {} definitions, expected one",
                MAIN_KEY,
                items.len()
            )))
        }
        JsonValue::Array(items) => match items.first() {
            Some(item) => RawDefinition::parse(item, "")?,
            None => RawDefinition::default(),
        },
        other => RawDefinition::parse(other, "")?,
    };

    let dispatch = main.dispatch("")?;
    action.attributes = ActionAttributes {
        action: dispatch.action,
        broker: dispatch.broker,
        provider: main.provider.clone(),
        out: main.out.clone(),
        endpoint: None,
    };
    action.text = dispatch.text;
    action.server_attributes = main.server_args.clone().map(|args| ServerAttributes { args: Some(args) });
    Ok(())
}

fn parse_filters(key: &str, path: &str) -> RuntimeResult<Vec<Filter>> {
    key.trim_start_matches(RESERVED_PREFIX)
        .split(';')
        .map(|f| {
            f.parse::<Filter>().map_err(|_| {
                RuntimeError::compile(format!(
                    "filter cannot be '{}' (key '{}' at '{}')",
                    f.trim(),
                    key,
                    display_path(path)
                ))
            })
        })
        .collect()
}

fn compile_level(
    level: &Map<String, JsonValue>,
    path: &str,
    on: &mut Vec<SubAction>,
    next_order: &mut i64,
) -> RuntimeResult<()> {
    let mut ranked: Vec<(Option<i64>, SubAction)> = Vec::new();

    for (key, value) in level.iter().filter(|(k, _)| k.starts_with(RESERVED_PREFIX)) {
        if path.is_empty() && key == MAIN_KEY {
            continue;
        }
        let filters = parse_filters(key, path)?;
        let definitions: Vec<&JsonValue> = match value {
            JsonValue::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        for definition in definitions {
            let raw = RawDefinition::parse(definition, path)?;
            let dispatch = raw.dispatch(path)?;
            let args = raw.compose_args();
            // order 0 counts as unset
            let order = raw.order.filter(|order| *order != 0);
            for filter in &filters {
                ranked.push((
                    order,
                    SubAction {
                        attributes: SubActionAttributes {
                            action: dispatch.action.clone(),
                            broker: dispatch.broker,
                            path: path.to_string(),
                            filter: *filter,
                            args: args.clone(),
                            order: 0,
                            out: raw.out.clone(),
                            provider: raw.provider.clone(),
                            id: raw.id.clone(),
                        },
                        text: dispatch.text.clone(),
                    },
                ));
            }
        }
    }

    // explicit order first, then filter priority; stable for ties
    ranked.sort_by_key(|(order, sub)| match order {
        Some(order) => (0, *order, 0),
        None => (1, 0, sub.attributes.filter.priority()),
    });
    for (_, mut sub) in ranked {
        sub.attributes.order = *next_order;
        *next_order += 1;
        on.push(sub);
    }

    for (key, value) in level.iter().filter(|(k, _)| !k.starts_with(RESERVED_PREFIX)) {
        let child_path = tree::join(path, key);
        match value {
            JsonValue::Object(child) => compile_level(child, &child_path, on, next_order)?,
            other => {
                return Err(RuntimeError::compile(format!(
                    "'{}' must be a mapping of nested definitions, found {}",
                    child_path, other
                )))
            }
        }
    }
    Ok(())
}
