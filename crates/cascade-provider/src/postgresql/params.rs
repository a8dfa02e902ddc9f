//! Statement rewriting and argument binding for PostgreSQL

use crate::provider::QueryControl;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgArguments;
use sqlx::Postgres;

pub type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Statement with `:name` placeholders rewritten to `$n`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedStatement {
    pub sql: String,
    /// Parameter name for each `$n`, in position order
    pub names: Vec<String>,
}

impl NamedStatement {
    /// Rewrite `:name` placeholders. `::type` casts and quoted text are left alone;
    /// a repeated name reuses its position.
    pub fn parse(statement: &str) -> Self {
        let chars: Vec<char> = statement.chars().collect();
        let mut sql = String::with_capacity(statement.len());
        let mut names: Vec<String> = Vec::new();
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if let Some(q) = quote {
                sql.push(c);
                if c == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    sql.push(c);
                    i += 1;
                }
                ':' if chars.get(i + 1) == Some(&':') => {
                    sql.push_str("::");
                    i += 2;
                }
                ':' if chars.get(i + 1).is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    let position = match names.iter().position(|n| *n == name) {
                        Some(idx) => idx + 1,
                        None => {
                            names.push(name);
                            names.len()
                        }
                    };
                    sql.push('$');
                    sql.push_str(&position.to_string());
                    i = end;
                }
                _ => {
                    sql.push(c);
                    i += 1;
                }
            }
        }

        Self { sql, names }
    }

    /// Values for the placeholders; missing parameters bind as NULL
    pub fn values(&self, params: &JsonValue) -> Vec<JsonValue> {
        self.names.iter().map(|name| params.get(name).cloned().unwrap_or(JsonValue::Null)).collect()
    }
}

/// Quote an identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether `name` is a plain (optionally schema qualified) identifier
pub fn is_identifier_path(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Argument keys that are engine bookkeeping rather than data
pub fn is_service_key(key: &str) -> bool {
    key.starts_with('$') || key.starts_with("__")
}

/// Wrap a statement with ordering, row numbers and range limits
pub fn apply_control(sql: &str, control: Option<&QueryControl>, return_rn: bool) -> String {
    let control = control.filter(|c| !c.is_empty());
    if control.is_none() && !return_rn {
        return sql.to_string();
    }

    let order_by = control
        .map(|c| {
            c.sorts
                .iter()
                .map(|s| format!("{} {}", quote_ident(&s.field), if s.desc { "desc" } else { "asc" }))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    let order_clause = if order_by.is_empty() { String::new() } else { format!(" order by {}", order_by) };

    let mut wrapped = if return_rn {
        format!(
            "select t.*, row_number() over ({}) as _rn from ({}) t{}",
            order_clause.trim_start(),
            sql,
            order_clause
        )
    } else {
        format!("select t.* from ({}) t{}", sql, order_clause)
    };

    if let Some(range) = control.and_then(|c| c.range) {
        wrapped.push_str(&format!(" offset {}", range.chunk_start.saturating_sub(1)));
        if let Some(amount) = range.amount {
            wrapped.push_str(&format!(" limit {}", amount));
        }
    }
    wrapped
}

/// Bind one JSON value by its runtime type
pub fn bind_value<'q>(query: PgQuery<'q>, value: &JsonValue) -> PgQuery<'q> {
    use sqlx::types::Json;

    match value {
        JsonValue::Null => query.bind::<Option<String>>(None),
        JsonValue::Bool(flag) => query.bind(*flag),
        JsonValue::Number(num) => {
            if let Some(v) = num.as_i64() {
                query.bind(v)
            } else if let Some(v) = num.as_f64() {
                query.bind(v)
            } else {
                query.bind(num.to_string())
            }
        }
        JsonValue::String(text) => query.bind(text.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => query.bind(Json(value.clone())),
    }
}

pub fn bind_all<'q>(mut query: PgQuery<'q>, values: &[JsonValue]) -> PgQuery<'q> {
    for value in values {
        query = bind_value(query, value);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{QueryRange, QuerySort};
    use serde_json::json;

    #[test]
    fn named_parameters_become_positional() {
        let stmt = NamedStatement::parse(
            "select :id::int8 as id, ':skip' as lit, \"a:b\" from t where x = :name or y = :id",
        );
        assert_eq!(
            stmt.sql,
            "select $1::int8 as id, ':skip' as lit, \"a:b\" from t where x = $2 or y = $1"
        );
        assert_eq!(stmt.names, vec!["id", "name"]);
        assert_eq!(stmt.values(&json!({"name": "n"})), vec![json!(null), json!("n")]);
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier_path("public.unit_add"));
        assert!(!is_identifier_path("unit; drop table x"));
        assert!(!is_identifier_path("a..b"));
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert!(is_service_key("$action"));
        assert!(is_service_key("__context"));
        assert!(!is_service_key("name"));
    }

    #[test]
    fn control_wrapping() {
        assert_eq!(apply_control("select 1", None, false), "select 1");

        let control = QueryControl {
            sorts: vec![QuerySort { field: "name".into(), desc: true }],
            range: Some(QueryRange { chunk_start: 11, amount: Some(10) }),
        };
        assert_eq!(
            apply_control("select * from x", Some(&control), false),
            "select t.* from (select * from x) t order by \"name\" desc offset 10 limit 10"
        );
        assert_eq!(
            apply_control("select * from x", None, true),
            "select t.*, row_number() over () as _rn from (select * from x) t"
        );
    }
}
