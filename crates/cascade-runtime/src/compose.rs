//! Allow-listed argument composition
//!
//! A compose expression builds an argument mapping from a fixed set of
//! sources:
//!
//! ```text
//! _compose('pid;...;org', /id, *, @org)
//! ```
//!
//! The first operand names the targets (`;`-separated dot paths, `...`
//! spreads a mapping); each following operand supplies one value:
//!
//! * `@path` - field of the session context
//! * `*` / `*.path` - the current node or one of its fields
//! * `/path` - the action-tree root, with ancestor elements resolved live
//! * `name.path` (or `@@name`) - field of the current node
//! * string, number, `true`, `false` and `null` literals
//!
//! Nothing else can be referenced.

use crate::error::{RuntimeError, RuntimeResult};
use cascade_core::tree;
use serde_json::{Map, Value as JsonValue};

/// Leading marker that identifies a compose expression
pub const COMPOSE_MARKER: &str = "_compose";

/// Target that merges a mapping into the result
pub const SPREAD_TARGET: &str = "...";

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Session(String),
    Node(Option<String>),
    Root(String),
    Field(String),
    Literal(JsonValue),
}

/// Parsed compose expression
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeExpr {
    targets: Vec<String>,
    operands: Vec<Operand>,
}

/// Data a compose expression may read
#[derive(Debug, Clone, Copy)]
pub struct ComposeContext<'a> {
    pub session: &'a JsonValue,
    pub node: Option<&'a JsonValue>,
    pub root: Option<RootView<'a>>,
}

impl<'a> ComposeContext<'a> {
    /// Context with only the session visible, as used for server arguments
    pub fn session_only(session: &'a JsonValue) -> Self {
        Self { session, node: None, root: None }
    }
}

pub fn is_compose(text: &str) -> bool {
    text.trim_start().starts_with(COMPOSE_MARKER)
}

impl ComposeExpr {
    pub fn parse(text: &str) -> RuntimeResult<Self> {
        Parser::new(text).expression()
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn evaluate(&self, ctx: &ComposeContext<'_>) -> RuntimeResult<JsonValue> {
        let mut out = JsonValue::Object(Map::new());
        for (target, operand) in self.targets.iter().zip(&self.operands) {
            let value = resolve(operand, ctx);
            if target == SPREAD_TARGET {
                match value {
                    Some(JsonValue::Object(fields)) => {
                        if let JsonValue::Object(out) = &mut out {
                            out.extend(fields);
                        }
                    }
                    None | Some(JsonValue::Null) => {}
                    Some(other) => {
                        return Err(RuntimeError::composition(format!(
                            "cannot spread {} into arguments",
                            type_name(&other)
                        )))
                    }
                }
            } else if let Some(value) = value {
                tree::set(&mut out, target, value)?;
            }
        }
        Ok(out)
    }
}

/// Parse and evaluate in one step
pub fn compose(text: &str, ctx: &ComposeContext<'_>) -> RuntimeResult<JsonValue> {
    ComposeExpr::parse(text)?.evaluate(ctx)
}

fn resolve(operand: &Operand, ctx: &ComposeContext<'_>) -> Option<JsonValue> {
    match operand {
        Operand::Session(path) => tree::get(ctx.session, path).cloned(),
        Operand::Node(None) => ctx.node.cloned(),
        Operand::Node(Some(path)) | Operand::Field(path) => {
            ctx.node.and_then(|node| tree::get(node, path)).cloned()
        }
        Operand::Root(path) => ctx.root.and_then(|root| root.get(path)).cloned(),
        Operand::Literal(value) => Some(value.clone()),
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a sequence",
        JsonValue::Object(_) => "a mapping",
    }
}

/// Ancestor elements the walker is currently inside, by their deep path
#[derive(Debug, Clone, Default)]
pub struct RootBindings {
    /// (deep path without indices, concrete index path in the live tree)
    entries: Vec<(String, String)>,
}

impl RootBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `deep_path` at the live element at `index_path`. Bindings below
    /// `deep_path` belonged to the previous element and are dropped.
    pub fn bind(&mut self, deep_path: &str, index_path: &str) {
        self.entries.retain(|(deep, _)| !is_within(deep, deep_path));
        self.entries.push((deep_path.to_string(), index_path.to_string()));
    }

    /// Live path for a root path, using the longest bound prefix
    fn live_path(&self, path: &str) -> Option<String> {
        self.entries
            .iter()
            .filter(|(deep, _)| is_within(path, deep))
            .max_by_key(|(deep, _)| deep.len())
            .map(|(deep, index)| {
                let rest = path[deep.len()..].trim_start_matches('.');
                tree::join(index, rest)
            })
    }
}

/// `path` equals `prefix` or lies below it
fn is_within(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

/// Root data as seen from inside the walk: ancestor elements resolve in the
/// live tree, everything else in the snapshot taken before the walk.
#[derive(Debug, Clone, Copy)]
pub struct RootView<'a> {
    pub live: &'a JsonValue,
    pub snapshot: &'a JsonValue,
    pub bindings: &'a RootBindings,
}

impl<'a> RootView<'a> {
    pub fn get(&self, path: &str) -> Option<&'a JsonValue> {
        match self.bindings.live_path(path) {
            Some(live_path) => tree::get(self.live, &live_path),
            None => tree::get(self.snapshot, path),
        }
    }
}

struct Parser<'s> {
    source: &'s str,
    chars: Vec<char>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        Self { source, chars: source.chars().collect(), pos: 0 }
    }

    fn error(&self, msg: impl std::fmt::Display) -> RuntimeError {
        RuntimeError::composition(format!("{} at offset {} in '{}'", msg, self.pos, self.source))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> RuntimeResult<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    fn expression(mut self) -> RuntimeResult<ComposeExpr> {
        self.skip_ws();
        for expected in COMPOSE_MARKER.chars() {
            if self.peek() != Some(expected) {
                return Err(self.error(format!("expected '{}'", COMPOSE_MARKER)));
            }
            self.pos += 1;
        }
        self.expect('(')?;
        self.skip_ws();
        let names = match self.peek() {
            Some('\'') | Some('"') => self.string()?,
            _ => return Err(self.error("expected quoted target list")),
        };

        let mut operands = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                Some(',') => {
                    self.pos += 1;
                    self.skip_ws();
                    operands.push(self.operand()?);
                }
                Some(c) => return Err(self.error(format!("unexpected '{}'", c))),
                None => return Err(self.error("unterminated expression")),
            }
        }
        self.skip_ws();
        if self.pos < self.chars.len() {
            return Err(self.error("trailing input"));
        }

        let targets: Vec<String> = if names.trim().is_empty() {
            Vec::new()
        } else {
            names.split(';').map(|t| t.trim().to_string()).collect()
        };
        if targets.iter().any(String::is_empty) {
            return Err(RuntimeError::composition(format!("empty target in '{}'", names)));
        }
        if targets.len() != operands.len() {
            return Err(RuntimeError::composition(format!(
                "{} targets but {} values in '{}'",
                targets.len(),
                operands.len(),
                self.source
            )));
        }
        Ok(ComposeExpr { targets, operands })
    }

    fn operand(&mut self) -> RuntimeResult<Operand> {
        match self.peek() {
            Some('\'') | Some('"') => Ok(Operand::Literal(JsonValue::String(self.string()?))),
            Some('@') => {
                self.pos += 1;
                if self.peek() == Some('@') {
                    self.pos += 1;
                    let path = self.path();
                    if path.is_empty() {
                        return Err(self.error("expected field name after '@@'"));
                    }
                    Ok(Operand::Field(path))
                } else {
                    Ok(Operand::Session(self.path()))
                }
            }
            Some('*') => {
                self.pos += 1;
                if self.peek() == Some('.') {
                    self.pos += 1;
                    let path = self.path();
                    if path.is_empty() {
                        return Err(self.error("expected field name after '*.'"));
                    }
                    Ok(Operand::Node(Some(path)))
                } else {
                    Ok(Operand::Node(None))
                }
            }
            Some('/') => {
                self.pos += 1;
                Ok(Operand::Root(self.path()))
            }
            Some(c) if c.is_ascii_digit() || c == '-' => self.number(),
            Some(c) if is_path_start(c) => {
                let path = self.path();
                Ok(match path.as_str() {
                    "true" => Operand::Literal(JsonValue::Bool(true)),
                    "false" => Operand::Literal(JsonValue::Bool(false)),
                    "null" => Operand::Literal(JsonValue::Null),
                    _ => Operand::Field(path),
                })
            }
            Some(c) => Err(self.error(format!("unexpected '{}'", c))),
            None => Err(self.error("missing value")),
        }
    }

    fn path(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| is_path_start(c) || c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn number(&mut self) -> RuntimeResult<Operand> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<serde_json::Number>()
            .map(|n| Operand::Literal(JsonValue::Number(n)))
            .map_err(|_| self.error(format!("invalid number '{}'", text)))
    }

    fn string(&mut self) -> RuntimeResult<String> {
        let quote = self.peek().ok_or_else(|| self.error("expected string"))?;
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("unterminated string"))?;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    self.pos += 1;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }
}

fn is_path_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}
