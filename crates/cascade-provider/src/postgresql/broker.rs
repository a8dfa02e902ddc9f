//! Generic CRUD statements for broker dispatch (`schema.table.add|upd|del|get`)

use super::params::{is_identifier_path, is_service_key, quote_ident};
use crate::error::{ProviderError, ProviderResult};
use serde_json::Value as JsonValue;

/// Key column used by `upd`, `del` and `get`
pub const KEY_COLUMN: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOp {
    Add,
    Upd,
    Del,
    Get,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerStatement {
    pub sql: String,
    pub values: Vec<JsonValue>,
}

/// Build the statement for a broker action name and its arguments
pub fn build(provider: &str, action: &str, params: &JsonValue) -> ProviderResult<BrokerStatement> {
    let (table, op) = action
        .rsplit_once('.')
        .ok_or_else(|| ProviderError::execution(provider, format!("invalid broker action '{}'", action)))?;
    let op = match op {
        "add" => BrokerOp::Add,
        "upd" => BrokerOp::Upd,
        "del" => BrokerOp::Del,
        "get" => BrokerOp::Get,
        other => {
            return Err(ProviderError::execution(
                provider,
                format!("unknown broker operation '{}' in '{}'", other, action),
            ))
        }
    };
    if !is_identifier_path(table) {
        return Err(ProviderError::execution(provider, format!("invalid broker table '{}'", table)));
    }
    let table = table.split('.').map(quote_ident).collect::<Vec<_>>().join(".");

    let columns: Vec<(&str, &JsonValue)> = params
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .filter(|(key, value)| {
                    !is_service_key(key) && !matches!(value, JsonValue::Object(_) | JsonValue::Array(_))
                })
                .map(|(key, value)| (key.as_str(), value))
                .collect()
        })
        .unwrap_or_default();

    let key = || {
        params
            .get(KEY_COLUMN)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| ProviderError::execution(provider, format!("'{}' requires '{}'", action, KEY_COLUMN)))
    };

    let statement = match op {
        BrokerOp::Add => {
            let (names, values): (Vec<&str>, Vec<JsonValue>) =
                columns.iter().map(|(k, v)| (*k, (*v).clone())).unzip();
            if names.is_empty() {
                BrokerStatement { sql: format!("insert into {} default values returning *", table), values }
            } else {
                let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${}", i)).collect();
                let names: Vec<String> = names.into_iter().map(quote_ident).collect();
                BrokerStatement {
                    sql: format!(
                        "insert into {} ({}) values ({}) returning *",
                        table,
                        names.join(", "),
                        placeholders.join(", ")
                    ),
                    values,
                }
            }
        }
        BrokerOp::Upd => {
            let key = key()?;
            let mut values = Vec::new();
            let mut assignments = Vec::new();
            for (name, value) in columns.iter().filter(|(k, _)| *k != KEY_COLUMN) {
                values.push((*value).clone());
                assignments.push(format!("{} = ${}", quote_ident(name), values.len()));
            }
            if assignments.is_empty() {
                return Err(ProviderError::execution(provider, format!("'{}' has nothing to update", action)));
            }
            values.push(key);
            BrokerStatement {
                sql: format!(
                    "update {} set {} where {} = ${} returning *",
                    table,
                    assignments.join(", "),
                    quote_ident(KEY_COLUMN),
                    values.len()
                ),
                values,
            }
        }
        BrokerOp::Del => BrokerStatement {
            sql: format!("delete from {} where {} = $1 returning *", table, quote_ident(KEY_COLUMN)),
            values: vec![key()?],
        },
        BrokerOp::Get => BrokerStatement {
            sql: format!("select * from {} where {} = $1", table, quote_ident(KEY_COLUMN)),
            values: vec![key()?],
        },
    };
    Ok(statement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_uses_scalar_columns() {
        let stmt = build(
            "pg",
            "mdl.unit.add",
            &json!({"name": "x", "$action": "add", "__context": {}, "lines": [1], "code": 3}),
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "insert into \"mdl\".\"unit\" (\"code\", \"name\") values ($1, $2) returning *"
        );
        assert_eq!(stmt.values, vec![json!(3), json!("x")]);
    }

    #[test]
    fn upd_del_get_need_key() {
        let upd = build("pg", "mdl.unit.upd", &json!({"id": 5, "name": "y"})).unwrap();
        assert_eq!(upd.sql, "update \"mdl\".\"unit\" set \"name\" = $1 where \"id\" = $2 returning *");
        assert_eq!(upd.values, vec![json!("y"), json!(5)]);

        let del = build("pg", "mdl.unit.del", &json!({"id": 5})).unwrap();
        assert_eq!(del.sql, "delete from \"mdl\".\"unit\" where \"id\" = $1 returning *");

        assert!(build("pg", "mdl.unit.get", &json!({})).is_err());
        assert!(build("pg", "mdl.unit.upd", &json!({"id": 1})).is_err());
    }

    #[test]
    fn rejects_bad_names() {
        assert!(build("pg", "unit", &json!({})).is_err());
        assert!(build("pg", "mdl.unit.merge", &json!({})).is_err());
        assert!(build("pg", "mdl;drop.unit.add", &json!({})).is_err());
    }
}
