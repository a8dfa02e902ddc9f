//! `out` specifications: how a result record flows back into the arguments

use crate::error::{CoreError, CoreResult};
use crate::tree;
use serde_json::Value as JsonValue;

/// Parsed form of an action's `out` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutSpec {
    /// `...`: merge every field of the record into the node
    MergeAll,
    /// `target:source[|alias];...`
    Fields(Vec<OutField>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutField {
    /// Path written in the argument node
    pub target: String,
    /// Field read from the result record
    pub source: String,
}

impl OutSpec {
    pub fn parse(spec: &str) -> CoreResult<Self> {
        let spec = spec.trim();
        if spec == "..." {
            return Ok(OutSpec::MergeAll);
        }

        let mut fields = Vec::new();
        for item in spec.split(';').map(str::trim).filter(|i| !i.is_empty()) {
            let (target, source) = match item.split_once(':') {
                Some((target, source)) => (target.trim(), source.trim()),
                None => (item, item),
            };
            // the alias after '|' is informational only
            let target = target.split('|').next().unwrap_or_default().trim();
            let source = source.split('|').next().unwrap_or_default().trim();
            if target.is_empty() || source.is_empty() {
                return Err(CoreError::InvalidOut(format!("malformed entry '{}'", item)));
            }
            fields.push(OutField { target: target.to_string(), source: source.to_string() });
        }

        if fields.is_empty() {
            return Err(CoreError::InvalidOut(format!("no entries in '{}'", spec)));
        }
        Ok(OutSpec::Fields(fields))
    }

    /// Copy fields of `record` into `node`. Non-mapping records are ignored.
    pub fn apply(&self, node: &mut JsonValue, record: &JsonValue) -> CoreResult<()> {
        let JsonValue::Object(record) = record else {
            return Ok(());
        };

        match self {
            OutSpec::MergeAll => {
                if !node.is_object() {
                    *node = JsonValue::Object(serde_json::Map::new());
                }
                if let JsonValue::Object(target) = node {
                    target.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            OutSpec::Fields(fields) => {
                for field in fields {
                    if let Some(value) = record.get(&field.source) {
                        tree::set(node, &field.target, value.clone())?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_forms() {
        assert_eq!(OutSpec::parse("...").unwrap(), OutSpec::MergeAll);
        assert_eq!(
            OutSpec::parse("id; pid:id|parent ;name").unwrap(),
            OutSpec::Fields(vec![
                OutField { target: "id".into(), source: "id".into() },
                OutField { target: "pid".into(), source: "id".into() },
                OutField { target: "name".into(), source: "name".into() },
            ])
        );
        assert!(OutSpec::parse(" ; ").is_err());
        assert!(OutSpec::parse("a:").is_err());
    }

    #[test]
    fn merge_all_copies_every_field() {
        let mut node = json!({"name": "x"});
        OutSpec::MergeAll.apply(&mut node, &json!({"id": 7, "code": "A"})).unwrap();
        assert_eq!(node, json!({"name": "x", "id": 7, "code": "A"}));
    }

    #[test]
    fn named_fields_skip_missing_sources() {
        let mut node = json!({"name": "x"});
        let spec = OutSpec::parse("a:b;header.id:id").unwrap();
        spec.apply(&mut node, &json!({"id": 3})).unwrap();
        assert_eq!(node, json!({"name": "x", "header": {"id": 3}}));

        spec.apply(&mut node, &json!({"b": "copied"})).unwrap();
        assert_eq!(node["a"], json!("copied"));
    }

    #[test]
    fn non_mapping_records_are_ignored() {
        let mut node = json!({"name": "x"});
        OutSpec::parse("id").unwrap().apply(&mut node, &json!([])).unwrap();
        assert_eq!(node, json!({"name": "x"}));
    }
}
