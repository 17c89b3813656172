//! Engine-native query descriptors
//!
//! Queries are assembled from these types directly; there is no text query
//! language. A descriptor is checked against the registered schemas when it
//! is registered (see [`crate::engine::Engine::register_query`]).
//!
//! ```rust
//! use ceplite_runtime::query::{Expr, PatternQuery, QueryDescriptor};
//! use std::time::Duration;
//!
//! let growth: QueryDescriptor = PatternQuery::new("growth")
//!     .first("a", "Stock")
//!     .then("b", "Stock")
//!     .correlate("key", "key")
//!     .within(Duration::from_secs(1))
//!     .select("key", Expr::field("a", "key"))
//!     .select("growth", Expr::field("b", "closing").sub(Expr::field("a", "closing")))
//!     .into();
//! assert_eq!(growth.name(), "growth");
//! ```

use ceplite_core::{EventSchema, FieldType, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::aggregation::AggregateFunc;
use crate::event::Event;
use crate::window::WindowSpec;

// ============================================================================
// PREDICATES
// ============================================================================

/// Filter condition evaluated against a single event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Lt(String, Value),
    Le(String, Value),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt(field.into(), value.into())
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ge(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt(field.into(), value.into())
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Le(field.into(), value.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against an event. Comparisons between incompatible types
    /// are false (and `Ne` is true).
    pub fn matches(&self, event: &Event) -> bool {
        use std::cmp::Ordering::*;
        let cmp = |field: &str, value: &Value| event.get(field).and_then(|v| v.compare(value));
        match self {
            Predicate::Eq(f, v) => cmp(f, v) == Some(Equal),
            Predicate::Ne(f, v) => cmp(f, v) != Some(Equal),
            Predicate::Gt(f, v) => cmp(f, v) == Some(Greater),
            Predicate::Ge(f, v) => matches!(cmp(f, v), Some(Greater | Equal)),
            Predicate::Lt(f, v) => cmp(f, v) == Some(Less),
            Predicate::Le(f, v) => matches!(cmp(f, v), Some(Less | Equal)),
            Predicate::And(a, b) => a.matches(event) && b.matches(event),
            Predicate::Or(a, b) => a.matches(event) || b.matches(event),
            Predicate::Not(p) => !p.matches(event),
        }
    }

    /// Check every referenced field against the schema.
    pub(crate) fn check(&self, schema: &EventSchema) -> Result<(), String> {
        match self {
            Predicate::Eq(f, v)
            | Predicate::Ne(f, v)
            | Predicate::Gt(f, v)
            | Predicate::Ge(f, v)
            | Predicate::Lt(f, v)
            | Predicate::Le(f, v) => {
                let ty = schema
                    .field_type(f)
                    .ok_or_else(|| format!("filter references unknown field '{}'", f))?;
                let vt = v.field_type();
                let comparable = ty == vt || (ty.is_numeric() && vt.is_numeric());
                if comparable {
                    Ok(())
                } else {
                    Err(format!(
                        "filter compares {} field '{}' with a {} literal",
                        ty, f, vt
                    ))
                }
            }
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.check(schema)?;
                b.check(schema)
            }
            Predicate::Not(p) => p.check(schema),
        }
    }
}

// ============================================================================
// PROJECTION EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        })
    }
}

/// Output column expression over aliased input events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Field {
        alias: String,
        field: String,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn field(alias: impl Into<String>, field: impl Into<String>) -> Self {
        Expr::Field {
            alias: alias.into(),
            field: field.into(),
        }
    }

    fn binary(self, op: BinaryOp, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Add, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Sub, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Mul, rhs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(self, rhs: Expr) -> Self {
        self.binary(BinaryOp::Div, rhs)
    }

    /// Evaluate against `(alias, event)` bindings.
    pub fn eval(&self, bindings: &[(&str, &Event)]) -> Option<Value> {
        match self {
            Expr::Field { alias, field } => bindings
                .iter()
                .find(|(a, _)| *a == alias.as_str())
                .and_then(|(_, e)| e.get(field))
                .cloned(),
            Expr::Binary { op, lhs, rhs } => {
                let l = lhs.eval(bindings)?;
                let r = rhs.eval(bindings)?;
                apply_binary(*op, &l, &r)
            }
        }
    }

    /// Infer the result type, validating aliases and fields.
    pub(crate) fn infer(&self, scope: &[(&str, &EventSchema)]) -> Result<FieldType, String> {
        match self {
            Expr::Field { alias, field } => {
                let (_, schema) = scope
                    .iter()
                    .find(|(a, _)| *a == alias.as_str())
                    .ok_or_else(|| format!("unknown alias '{}'", alias))?;
                schema
                    .field_type(field)
                    .ok_or_else(|| format!("'{}' has no field '{}'", alias, field))
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = lhs.infer(scope)?;
                let r = rhs.infer(scope)?;
                if !l.is_numeric() || !r.is_numeric() {
                    return Err(format!("operator '{}' needs numeric operands, got {} and {}", op, l, r));
                }
                Ok(match (op, l, r) {
                    (BinaryOp::Div, _, _) => FieldType::Float,
                    (_, FieldType::Int, FieldType::Int) => FieldType::Int,
                    _ => FieldType::Float,
                })
            }
        }
    }
}

fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> Option<Value> {
    if let (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul, Value::Int(a), Value::Int(b)) = (op, l, r) {
        let v = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            _ => a.checked_mul(*b),
        };
        return v.map(Value::Int);
    }
    let a = l.as_float()?;
    let b = r.as_float()?;
    Some(Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
    }))
}

/// Named output column
pub type Projection = Vec<(String, Expr)>;

// ============================================================================
// DESCRIPTORS
// ============================================================================

/// Plain window: new rows for inserted events, expired rows for evicted ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowQuery {
    pub name: String,
    pub event_type: String,
    pub filter: Option<Predicate>,
    pub window: WindowSpec,
}

impl WindowQuery {
    pub fn new(name: impl Into<String>, event_type: impl Into<String>, window: WindowSpec) -> Self {
        Self {
            name: name.into(),
            event_type: event_type.into(),
            filter: None,
            window,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }
}

/// Grouped running aggregate over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateQuery {
    pub name: String,
    pub event_type: String,
    pub filter: Option<Predicate>,
    pub window: WindowSpec,
    pub group_by: Vec<String>,
    pub function: AggregateFunc,
    /// Column name of the aggregate value in result rows
    pub output: String,
}

impl AggregateQuery {
    pub fn new(
        name: impl Into<String>,
        event_type: impl Into<String>,
        window: WindowSpec,
        function: AggregateFunc,
    ) -> Self {
        let output = function.default_output().to_string();
        Self {
            name: name.into(),
            event_type: event_type.into(),
            filter: None,
            window,
            group_by: Vec::new(),
            function,
            output,
        }
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.output = name.into();
        self
    }
}

/// One stage of a two-stage pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStage {
    pub alias: String,
    pub event_type: String,
    pub filter: Option<Predicate>,
}

/// `every a=First -> b=Second(b.key = a.key)` bounded by a timer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternQuery {
    pub name: String,
    pub first: PatternStage,
    pub second: PatternStage,
    /// `(first field, second field)` that must be equal
    pub correlation: (String, String),
    pub within: Duration,
    pub projection: Projection,
}

impl PatternQuery {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            first: PatternStage {
                alias: "a".into(),
                event_type: String::new(),
                filter: None,
            },
            second: PatternStage {
                alias: "b".into(),
                event_type: String::new(),
                filter: None,
            },
            correlation: ("key".into(), "key".into()),
            within: Duration::from_secs(1),
            projection: Vec::new(),
        }
    }

    pub fn first(mut self, alias: impl Into<String>, event_type: impl Into<String>) -> Self {
        self.first.alias = alias.into();
        self.first.event_type = event_type.into();
        self
    }

    pub fn first_filter(mut self, predicate: Predicate) -> Self {
        self.first.filter = Some(predicate);
        self
    }

    pub fn then(mut self, alias: impl Into<String>, event_type: impl Into<String>) -> Self {
        self.second.alias = alias.into();
        self.second.event_type = event_type.into();
        self
    }

    pub fn then_filter(mut self, predicate: Predicate) -> Self {
        self.second.filter = Some(predicate);
        self
    }

    pub fn correlate(mut self, first_field: impl Into<String>, second_field: impl Into<String>) -> Self {
        self.correlation = (first_field.into(), second_field.into());
        self
    }

    pub fn within(mut self, within: Duration) -> Self {
        self.within = within;
        self
    }

    pub fn select(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.projection.push((name.into(), expr));
        self
    }
}

/// One side of a join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinInput {
    pub alias: String,
    pub event_type: String,
    pub filter: Option<Predicate>,
    pub window: WindowSpec,
}

impl JoinInput {
    pub fn new(alias: impl Into<String>, event_type: impl Into<String>, window: WindowSpec) -> Self {
        Self {
            alias: alias.into(),
            event_type: event_type.into(),
            filter: None,
            window,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }
}

/// Two windowed streams correlated by an optional equality key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinQuery {
    pub name: String,
    pub left: JoinInput,
    pub right: JoinInput,
    /// `(left field, right field)`; `None` pairs every live row of each side
    pub on: Option<(String, String)>,
    /// `None` emits every field of both sides as `alias.field`
    pub projection: Option<Projection>,
}

impl JoinQuery {
    pub fn new(name: impl Into<String>, left: JoinInput, right: JoinInput) -> Self {
        Self {
            name: name.into(),
            left,
            right,
            on: None,
            projection: None,
        }
    }

    pub fn on(mut self, left_field: impl Into<String>, right_field: impl Into<String>) -> Self {
        self.on = Some((left_field.into(), right_field.into()));
        self
    }

    pub fn select(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.projection
            .get_or_insert_with(Vec::new)
            .push((name.into(), expr));
        self
    }
}

/// A standing query, ready to be registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryDescriptor {
    Window(WindowQuery),
    Aggregate(AggregateQuery),
    Pattern(PatternQuery),
    Join(JoinQuery),
}

impl QueryDescriptor {
    pub fn name(&self) -> &str {
        match self {
            QueryDescriptor::Window(q) => &q.name,
            QueryDescriptor::Aggregate(q) => &q.name,
            QueryDescriptor::Pattern(q) => &q.name,
            QueryDescriptor::Join(q) => &q.name,
        }
    }

    /// Event types this query consumes, without duplicates.
    pub fn input_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = match self {
            QueryDescriptor::Window(q) => vec![q.event_type.as_str()],
            QueryDescriptor::Aggregate(q) => vec![q.event_type.as_str()],
            QueryDescriptor::Pattern(q) => {
                vec![q.first.event_type.as_str(), q.second.event_type.as_str()]
            }
            QueryDescriptor::Join(q) => vec![q.left.event_type.as_str(), q.right.event_type.as_str()],
        };
        types.dedup();
        types
    }
}

impl From<WindowQuery> for QueryDescriptor {
    fn from(q: WindowQuery) -> Self {
        QueryDescriptor::Window(q)
    }
}

impl From<AggregateQuery> for QueryDescriptor {
    fn from(q: AggregateQuery) -> Self {
        QueryDescriptor::Aggregate(q)
    }
}

impl From<PatternQuery> for QueryDescriptor {
    fn from(q: PatternQuery) -> Self {
        QueryDescriptor::Pattern(q)
    }
}

impl From<JoinQuery> for QueryDescriptor {
    fn from(q: JoinQuery) -> Self {
        QueryDescriptor::Join(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(key: &str, closing: f64) -> Event {
        Event::new("Stock")
            .with_field("key", key)
            .with_field("closing", closing)
    }

    fn stock_schema() -> EventSchema {
        EventSchema::new()
            .with_field("key", FieldType::Str)
            .with_field("closing", FieldType::Float)
            .with_field("volume", FieldType::Int)
    }

    #[test]
    fn test_predicate_comparisons() {
        let e = stock("apple", 10.0);
        assert!(Predicate::eq("key", "apple").matches(&e));
        assert!(!Predicate::eq("key", "cisco").matches(&e));
        assert!(Predicate::gt("closing", 9.5).matches(&e));
        assert!(Predicate::ge("closing", 10i64).matches(&e));
        assert!(!Predicate::lt("closing", 10.0).matches(&e));
        assert!(Predicate::le("closing", 10.0).matches(&e));
        assert!(Predicate::ne("key", "cisco").matches(&e));
    }

    #[test]
    fn test_predicate_combinators() {
        let e = stock("apple", 10.0);
        let p = Predicate::eq("key", "apple").and(Predicate::gt("closing", 20.0));
        assert!(!p.matches(&e));
        let p = Predicate::eq("key", "cisco").or(Predicate::gt("closing", 5.0));
        assert!(p.matches(&e));
        assert!(Predicate::eq("key", "cisco").not().matches(&e));
    }

    #[test]
    fn test_predicate_missing_field_is_false() {
        let e = stock("apple", 10.0);
        assert!(!Predicate::eq("volume", 1i64).matches(&e));
        assert!(Predicate::ne("volume", 1i64).matches(&e));
    }

    #[test]
    fn test_predicate_check() {
        let schema = stock_schema();
        assert!(Predicate::gt("volume", 1.5).check(&schema).is_ok());
        assert!(Predicate::eq("ticker", "x").check(&schema).is_err());
        assert!(Predicate::eq("key", 1i64).check(&schema).is_err());
    }

    #[test]
    fn test_expr_eval_growth() {
        let a = stock("x", 10.0);
        let b = stock("x", 12.0);
        let growth = Expr::field("b", "closing").sub(Expr::field("a", "closing"));
        assert_eq!(growth.eval(&[("a", &a), ("b", &b)]), Some(Value::Float(2.0)));
        assert_eq!(growth.eval(&[("a", &a)]), None);
    }

    #[test]
    fn test_expr_int_arithmetic() {
        let e = Event::new("T").with_field("x", 7i64).with_field("y", 2i64);
        let bind = [("t", &e)];
        assert_eq!(
            Expr::field("t", "x").mul(Expr::field("t", "y")).eval(&bind),
            Some(Value::Int(14))
        );
        assert_eq!(
            Expr::field("t", "x").div(Expr::field("t", "y")).eval(&bind),
            Some(Value::Float(3.5))
        );
        let big = Event::new("T").with_field("x", i64::MAX).with_field("y", 1i64);
        assert_eq!(
            Expr::field("t", "x").add(Expr::field("t", "y")).eval(&[("t", &big)]),
            None
        );
    }

    #[test]
    fn test_expr_infer() {
        let schema = stock_schema();
        let scope = [("a", &schema), ("b", &schema)];
        assert_eq!(
            Expr::field("b", "volume").sub(Expr::field("a", "volume")).infer(&scope),
            Ok(FieldType::Int)
        );
        assert_eq!(
            Expr::field("b", "closing").sub(Expr::field("a", "volume")).infer(&scope),
            Ok(FieldType::Float)
        );
        assert!(Expr::field("c", "closing").infer(&scope).is_err());
        assert!(Expr::field("a", "key").add(Expr::field("b", "closing")).infer(&scope).is_err());
    }

    #[test]
    fn test_descriptor_input_types() {
        let q: QueryDescriptor = PatternQuery::new("p").first("a", "Stock").then("b", "Stock").into();
        assert_eq!(q.input_types(), vec!["Stock"]);
        let j: QueryDescriptor = JoinQuery::new(
            "j",
            JoinInput::new("l", "A", WindowSpec::Length(1)),
            JoinInput::new("r", "B", WindowSpec::Length(1)),
        )
        .into();
        assert_eq!(j.input_types(), vec!["A", "B"]);
    }

    #[test]
    fn test_descriptor_serde_tag() {
        let q: QueryDescriptor = WindowQuery::new("w", "Stock", WindowSpec::Length(3)).into();
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["kind"], "window");
        let back: QueryDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, q);
    }
}
