//! Query compilation.
//!
//! Cursors only ever see a [`Predicate`]. [`Query`] compiles Mongo-style
//! selectors into one:
//!
//! ```ignore
//! let query = Query::compile(&json!({
//!     "status": "open",
//!     "priority": { "$gte": 2 },
//!     "$or": [{ "owner": "kim" }, { "owner": { "$exists": false } }]
//! }))?;
//! ```
//!
//! Any `Fn(&Document) -> bool` is a predicate as well.

use crate::error::{Result, ViewError};
use crate::types::{compare_values, Document};
use serde_json::Value;
use std::cmp::Ordering;

/// Opaque document test.
pub trait Predicate: Send + Sync {
    fn test(&self, document: &Document) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Document) -> bool + Send + Sync,
{
    fn test(&self, document: &Document) -> bool {
        self(document)
    }
}

#[derive(Clone, Debug)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Cmp(Ordering, bool, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Not(Vec<Condition>),
}

#[derive(Clone, Debug)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Nor(Vec<Node>),
    Field { path: String, conditions: Vec<Condition> },
}

/// A compiled selector.
#[derive(Clone, Debug)]
pub struct Query {
    root: Node,
    source: Value,
}

impl Query {
    /// Compile a selector. Fails on unknown operators or ill-typed operands.
    pub fn compile(selector: &Value) -> Result<Self> {
        let root = compile_selector(selector)?;
        Ok(Self {
            root,
            source: selector.clone(),
        })
    }

    /// Selector matching every document.
    pub fn all() -> Self {
        Self {
            root: Node::And(Vec::new()),
            source: Value::Object(Default::default()),
        }
    }

    /// The selector this query was compiled from.
    pub fn selector(&self) -> &Value {
        &self.source
    }
}

impl Predicate for Query {
    fn test(&self, document: &Document) -> bool {
        eval_node(&self.root, document)
    }
}

fn compile_error(msg: impl Into<String>) -> ViewError {
    ViewError::PredicateCompile(msg.into())
}

fn compile_selector(selector: &Value) -> Result<Node> {
    let map = selector
        .as_object()
        .ok_or_else(|| compile_error("selector must be an object"))?;

    let mut nodes = Vec::with_capacity(map.len());
    for (key, value) in map {
        let node = match key.as_str() {
            "$and" => Node::And(compile_list(key, value)?),
            "$or" => Node::Or(compile_list(key, value)?),
            "$nor" => Node::Nor(compile_list(key, value)?),
            op if op.starts_with('$') => {
                return Err(compile_error(format!("unknown top-level operator {op}")))
            }
            path => Node::Field {
                path: path.to_string(),
                conditions: compile_field(value)?,
            },
        };
        nodes.push(node);
    }
    Ok(Node::And(nodes))
}

fn compile_list(op: &str, value: &Value) -> Result<Vec<Node>> {
    let items = value
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| compile_error(format!("{op} expects a non-empty array")))?;
    items.iter().map(compile_selector).collect()
}

fn is_operator_object(value: &Value) -> Result<bool> {
    let Some(map) = value.as_object() else {
        return Ok(false);
    };
    let operators = map.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        Ok(false)
    } else if operators == map.len() {
        Ok(true)
    } else {
        Err(compile_error("cannot mix operators and fields in one condition"))
    }
}

fn compile_field(value: &Value) -> Result<Vec<Condition>> {
    if !is_operator_object(value)? {
        return Ok(vec![Condition::Eq(value.clone())]);
    }

    let mut conditions = Vec::new();
    for (op, operand) in value.as_object().into_iter().flatten() {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Cmp(Ordering::Greater, false, operand.clone()),
            "$gte" => Condition::Cmp(Ordering::Greater, true, operand.clone()),
            "$lt" => Condition::Cmp(Ordering::Less, false, operand.clone()),
            "$lte" => Condition::Cmp(Ordering::Less, true, operand.clone()),
            "$in" => Condition::In(array_operand(op, operand)?),
            "$nin" => Condition::Nin(array_operand(op, operand)?),
            "$exists" => match operand {
                Value::Bool(b) => Condition::Exists(*b),
                _ => return Err(compile_error("$exists expects a boolean")),
            },
            "$not" => {
                if !is_operator_object(operand)? {
                    return Err(compile_error("$not expects an operator object"));
                }
                Condition::Not(compile_field(operand)?)
            }
            other => return Err(compile_error(format!("unknown operator {other}"))),
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn array_operand(op: &str, operand: &Value) -> Result<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| compile_error(format!("{op} expects an array")))
}

fn eval_node(node: &Node, document: &Document) -> bool {
    match node {
        Node::And(nodes) => nodes.iter().all(|n| eval_node(n, document)),
        Node::Or(nodes) => nodes.iter().any(|n| eval_node(n, document)),
        Node::Nor(nodes) => !nodes.iter().any(|n| eval_node(n, document)),
        Node::Field { path, conditions } => {
            let value = document.get(path);
            conditions
                .iter()
                .all(|c| eval_condition(c, value.as_deref()))
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Equality with array fields matching on any element.
fn matches_eq(field: Option<&Value>, target: &Value) -> bool {
    match field {
        None => target.is_null(),
        Some(Value::Array(items)) => {
            values_equal(&Value::Array(items.clone()), target)
                || items.iter().any(|item| values_equal(item, target))
        }
        Some(value) => values_equal(value, target),
    }
}

fn matches_cmp(field: Option<&Value>, want: Ordering, inclusive: bool, target: &Value) -> bool {
    let check = |value: &Value| {
        // Range comparisons only apply within one type bracket.
        if std::mem::discriminant(value) != std::mem::discriminant(target) {
            return false;
        }
        let ord = compare_values(value, target);
        ord == want || (inclusive && ord == Ordering::Equal)
    };
    match field {
        None => false,
        Some(Value::Array(items)) => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn eval_condition(condition: &Condition, field: Option<&Value>) -> bool {
    match condition {
        Condition::Eq(target) => matches_eq(field, target),
        Condition::Ne(target) => !matches_eq(field, target),
        Condition::Cmp(want, inclusive, target) => matches_cmp(field, *want, *inclusive, target),
        Condition::In(targets) => targets.iter().any(|t| matches_eq(field, t)),
        Condition::Nin(targets) => !targets.iter().any(|t| matches_eq(field, t)),
        Condition::Exists(expected) => field.is_some() == *expected,
        Condition::Not(conditions) => !conditions.iter().all(|c| eval_condition(c, field)),
    }
}
