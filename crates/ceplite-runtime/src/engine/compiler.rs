//! Query compilation: descriptor validation against the registry and
//! construction of the per-query runtime state.

use ceplite_core::{EventSchema, FieldType};
use std::sync::Arc;

use super::pipeline::QueryState;
use crate::aggregation::GroupedAggregator;
use crate::config::EngineConfig;
use crate::error::RegistrationError;
use crate::join::JoinEngine;
use crate::pattern::PatternMatcher;
use crate::query::{
    AggregateQuery, JoinQuery, PatternQuery, Predicate, Projection, QueryDescriptor, WindowQuery,
};
use crate::registry::TypeRegistry;
use crate::window::{WindowSpec, WindowStore};

type CompileResult<T> = Result<T, RegistrationError>;

struct Compiler<'a> {
    registry: &'a TypeRegistry,
    query: &'a str,
}

impl<'a> Compiler<'a> {
    fn fail<T>(&self, reason: impl Into<String>) -> CompileResult<T> {
        Err(RegistrationError::compile(self.query, reason))
    }

    fn schema(&self, event_type: &str) -> CompileResult<&'a Arc<EventSchema>> {
        self.registry
            .get(event_type)
            .ok_or_else(|| RegistrationError::UnknownType(event_type.to_string()))
    }

    fn field(&self, schema: &EventSchema, event_type: &str, field: &str) -> CompileResult<FieldType> {
        match schema.field_type(field) {
            Some(ty) => Ok(ty),
            None => self.fail(format!("'{}' has no field '{}'", event_type, field)),
        }
    }

    fn window(&self, spec: &WindowSpec) -> CompileResult<()> {
        match spec {
            WindowSpec::Length(0) => self.fail("length window must retain at least one event"),
            WindowSpec::Time(d) if d.is_zero() => self.fail("time window duration must be positive"),
            _ => Ok(()),
        }
    }

    fn filter(&self, filter: Option<&Predicate>, schema: &EventSchema) -> CompileResult<()> {
        match filter.map(|p| p.check(schema)) {
            Some(Err(reason)) => self.fail(reason),
            _ => Ok(()),
        }
    }

    fn aliases(&self, a: &str, b: &str) -> CompileResult<()> {
        if a.is_empty() || b.is_empty() {
            return self.fail("aliases must not be empty");
        }
        if a == b {
            return self.fail(format!("alias '{}' is used twice", a));
        }
        Ok(())
    }

    fn correlation(
        &self,
        (left_type, left_schema, left_field): (&str, &EventSchema, &str),
        (right_type, right_schema, right_field): (&str, &EventSchema, &str),
    ) -> CompileResult<()> {
        let l = self.field(left_schema, left_type, left_field)?;
        let r = self.field(right_schema, right_type, right_field)?;
        if l == r || (l.is_numeric() && r.is_numeric()) {
            Ok(())
        } else {
            self.fail(format!(
                "cannot correlate {} field '{}' with {} field '{}'",
                l, left_field, r, right_field
            ))
        }
    }

    fn projection(&self, projection: &Projection, scope: &[(&str, &EventSchema)]) -> CompileResult<()> {
        for (i, (name, expr)) in projection.iter().enumerate() {
            if projection[..i].iter().any(|(n, _)| n == name) {
                return self.fail(format!("output column '{}' is defined twice", name));
            }
            if let Err(reason) = expr.infer(scope) {
                return self.fail(format!("column '{}': {}", name, reason));
            }
        }
        Ok(())
    }

    fn compile_window(&self, q: &WindowQuery) -> CompileResult<QueryState> {
        let schema = self.schema(&q.event_type)?;
        self.window(&q.window)?;
        self.filter(q.filter.as_ref(), schema)?;
        Ok(QueryState::Window {
            event_type: q.event_type.clone(),
            filter: q.filter.clone(),
            window: WindowStore::new(q.window),
        })
    }

    fn compile_aggregate(&self, q: &AggregateQuery) -> CompileResult<QueryState> {
        let schema = self.schema(&q.event_type)?;
        self.window(&q.window)?;
        self.filter(q.filter.as_ref(), schema)?;
        for (i, field) in q.group_by.iter().enumerate() {
            self.field(schema, &q.event_type, field)?;
            if q.group_by[..i].contains(field) {
                return self.fail(format!("'{}' is grouped twice", field));
            }
        }
        if let Some(field) = q.function.field() {
            let ty = self.field(schema, &q.event_type, field)?;
            if !ty.is_numeric() {
                return self.fail(format!(
                    "{} needs a numeric field, '{}' is {}",
                    q.function.name(),
                    field,
                    ty
                ));
            }
        }
        if q.output.is_empty() || q.group_by.contains(&q.output) {
            return self.fail(format!("invalid output column '{}'", q.output));
        }
        Ok(QueryState::Aggregate {
            event_type: q.event_type.clone(),
            filter: q.filter.clone(),
            window: WindowStore::new(q.window),
            aggregator: GroupedAggregator::new(q.group_by.clone(), q.function.clone(), &q.output),
        })
    }

    fn compile_pattern(&self, q: &PatternQuery, config: &EngineConfig) -> CompileResult<QueryState> {
        let first = self.schema(&q.first.event_type)?;
        let second = self.schema(&q.second.event_type)?;
        self.aliases(&q.first.alias, &q.second.alias)?;
        self.filter(q.first.filter.as_ref(), first)?;
        self.filter(q.second.filter.as_ref(), second)?;
        self.correlation(
            (q.first.event_type.as_str(), first.as_ref(), q.correlation.0.as_str()),
            (q.second.event_type.as_str(), second.as_ref(), q.correlation.1.as_str()),
        )?;
        if q.within.is_zero() {
            return self.fail("pattern timer duration must be positive");
        }
        if q.projection.is_empty() {
            return self.fail("pattern must project at least one column");
        }
        self.projection(
            &q.projection,
            &[
                (q.first.alias.as_str(), first.as_ref()),
                (q.second.alias.as_str(), second.as_ref()),
            ],
        )?;
        Ok(QueryState::Pattern(
            PatternMatcher::new(q).with_max_pending(config.max_pending_per_query),
        ))
    }

    fn compile_join(&self, q: &JoinQuery) -> CompileResult<QueryState> {
        let left = self.schema(&q.left.event_type)?;
        let right = self.schema(&q.right.event_type)?;
        self.aliases(&q.left.alias, &q.right.alias)?;
        self.window(&q.left.window)?;
        self.window(&q.right.window)?;
        self.filter(q.left.filter.as_ref(), left)?;
        self.filter(q.right.filter.as_ref(), right)?;
        if let Some((lf, rf)) = &q.on {
            self.correlation(
                (q.left.event_type.as_str(), left.as_ref(), lf.as_str()),
                (q.right.event_type.as_str(), right.as_ref(), rf.as_str()),
            )?;
        }
        if let Some(projection) = &q.projection {
            self.projection(
                projection,
                &[
                    (q.left.alias.as_str(), left.as_ref()),
                    (q.right.alias.as_str(), right.as_ref()),
                ],
            )?;
        }
        Ok(QueryState::Join(JoinEngine::new(q)))
    }
}

/// Validate `descriptor` and build its runtime state.
pub(crate) fn compile(
    descriptor: &QueryDescriptor,
    registry: &TypeRegistry,
    config: &EngineConfig,
) -> CompileResult<QueryState> {
    let compiler = Compiler {
        registry,
        query: descriptor.name(),
    };
    if descriptor.name().is_empty() {
        return compiler.fail("query name must not be empty");
    }
    match descriptor {
        QueryDescriptor::Window(q) => compiler.compile_window(q),
        QueryDescriptor::Aggregate(q) => compiler.compile_aggregate(q),
        QueryDescriptor::Pattern(q) => compiler.compile_pattern(q, config),
        QueryDescriptor::Join(q) => compiler.compile_join(q),
    }
}
