//! Expression translator.
//!
//! Converts an upstream `QueryExpr` into a `QueryNode`. Every rule is
//! independent; an operator or expression shape without a rule fails the
//! whole translation with `UnsupportedQuery` instead of being skipped.

mod include;
mod predicate;
mod projection;

use serde_json::Value;

use crate::ast::*;
use crate::error::{QueryError, QueryResult};
use crate::expr::{ElementOp, Expr, Lambda, QueryExpr, QueryOp};
use crate::metadata::Model;

pub(crate) use predicate::describe;
use predicate::{is_numeric, value_expr, Scope};

/// Translates upstream query pipelines against a model
pub struct Translator<'m> {
    model: &'m Model,
}

/// Pipeline position, used to reject operators whose meaning would change
/// if they were folded into a single store query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Filtering,
    Ordered,
    Paged,
    Projected,
    Terminal,
}

struct State {
    node: QueryNode,
    stage: Stage,
    /// Path of indices to the include `ThenInclude` extends
    include_cursor: Option<Vec<usize>>,
}

impl<'m> Translator<'m> {
    pub fn new(model: &'m Model) -> Self {
        Self { model }
    }

    /// Translate a full query pipeline.
    pub fn translate(&self, query: &QueryExpr) -> QueryResult<QueryNode> {
        let root = self.model.entity(&query.root)?;
        let (collection, key) = match (root.collection(), root.key()) {
            (Some(c), Some(k)) => (c, k),
            _ => return Err(QueryError::UnknownType(query.root.clone())),
        };

        let mut state = State {
            node: QueryNode::new(collection, &root.name, key),
            stage: Stage::Filtering,
            include_cursor: None,
        };

        for op in &query.ops {
            if state.stage == Stage::Terminal {
                return Err(QueryError::unsupported(format!(
                    "operator {} follows a terminal operator",
                    op_name(op)
                )));
            }
            self.apply(&mut state, op)?;
        }

        Ok(state.node)
    }

    fn apply(&self, state: &mut State, op: &QueryOp) -> QueryResult<()> {
        let root_type = state.node.entity_type.clone();
        match op {
            QueryOp::Where(predicate) => {
                self.require_stage(state, Stage::Ordered, op)?;
                self.add_predicate(state, predicate, &root_type)?;
            }
            QueryOp::OrderBy { key, descending } => {
                self.require_stage(state, Stage::Ordered, op)?;
                let clause = self.order_clause(key, &root_type, *descending)?;
                // a new OrderBy replaces any earlier ordering
                state.node.order_by = vec![clause];
                state.stage = Stage::Ordered;
            }
            QueryOp::ThenBy { key, descending } => {
                self.require_stage(state, Stage::Ordered, op)?;
                if state.node.order_by.is_empty() {
                    return Err(QueryError::unsupported("ThenBy requires a preceding OrderBy"));
                }
                let clause = self.order_clause(key, &root_type, *descending)?;
                state.node.order_by.push(clause);
            }
            QueryOp::Skip(count) => {
                self.require_stage(state, Stage::Paged, op)?;
                let count = value_expr(count)?;
                if state.node.limit_to_last.is_some() {
                    return Err(QueryError::unsupported("Skip cannot follow TakeLast"));
                }
                match (state.node.skip.take(), state.node.limit.take()) {
                    (None, None) => state.node.skip = Some(count),
                    (skip, limit) => {
                        // Take(n).Skip(k) keeps n - k; only foldable for constants
                        let extra = constant_count(&count, "Skip")?;
                        let prior = skip.map(|s| constant_count(&s, "Skip")).transpose()?.unwrap_or(0);
                        state.node.skip = Some(ValueExpr::constant(prior + extra));
                        if let Some(limit) = limit {
                            let remaining = constant_count(&limit, "Take")?.saturating_sub(extra);
                            state.node.limit = Some(ValueExpr::constant(remaining));
                        }
                    }
                }
                state.stage = Stage::Paged;
            }
            QueryOp::Take(count) => {
                self.require_stage(state, Stage::Paged, op)?;
                let count = value_expr(count)?;
                if state.node.limit_to_last.is_some() {
                    return Err(QueryError::unsupported("Take cannot follow TakeLast"));
                }
                state.node.limit = Some(match state.node.limit.take() {
                    None => count,
                    Some(previous) => {
                        let previous = constant_count(&previous, "Take")?;
                        let next = constant_count(&count, "Take")?;
                        ValueExpr::constant(previous.min(next))
                    }
                });
                state.stage = Stage::Paged;
            }
            QueryOp::TakeLast(count) => {
                self.require_stage(state, Stage::Ordered, op)?;
                if state.node.order_by.is_empty() {
                    return Err(QueryError::unsupported(
                        "TakeLast requires the ordering to be established with OrderBy",
                    ));
                }
                state.node.limit_to_last = Some(value_expr(count)?);
                state.stage = Stage::Paged;
            }
            QueryOp::Select(selector) => {
                self.require_stage(state, Stage::Paged, op)?;
                state.node.projection = self.translate_projection(selector, &root_type)?;
                state.stage = Stage::Projected;
            }
            QueryOp::Include(navigation) => {
                self.require_stage(state, Stage::Paged, op)?;
                let cursor = self.add_include(&mut state.node, None, navigation, &root_type)?;
                state.include_cursor = Some(cursor);
            }
            QueryOp::ThenInclude(navigation) => {
                self.require_stage(state, Stage::Paged, op)?;
                let Some(parent) = state.include_cursor.clone() else {
                    return Err(QueryError::unsupported("ThenInclude requires a preceding Include"));
                };
                let cursor = self.add_include(&mut state.node, Some(parent), navigation, &root_type)?;
                state.include_cursor = Some(cursor);
            }
            QueryOp::Count(predicate) => {
                self.terminal_predicate(state, predicate.as_ref(), &root_type)?;
                self.set_aggregation(state, AggregateKind::Count, None, &root_type)?;
            }
            QueryOp::Any(predicate) => {
                self.terminal_predicate(state, predicate.as_ref(), &root_type)?;
                self.set_aggregation(state, AggregateKind::Any, None, &root_type)?;
            }
            QueryOp::Sum(selector) => {
                self.set_aggregation(state, AggregateKind::Sum, Some(selector), &root_type)?
            }
            QueryOp::Average(selector) => {
                self.set_aggregation(state, AggregateKind::Average, Some(selector), &root_type)?
            }
            QueryOp::Min(selector) => {
                self.set_aggregation(state, AggregateKind::Min, Some(selector), &root_type)?
            }
            QueryOp::Max(selector) => {
                self.set_aggregation(state, AggregateKind::Max, Some(selector), &root_type)?
            }
            QueryOp::Element {
                op: element,
                or_default,
                predicate,
            } => {
                self.terminal_predicate(state, predicate.as_ref(), &root_type)?;
                let or_default = *or_default;
                state.node.cardinality = match element {
                    ElementOp::First => ResultCardinality::First { or_default },
                    ElementOp::Single => ResultCardinality::Single { or_default },
                    ElementOp::Last => {
                        if state.node.order_by.is_empty() {
                            return Err(QueryError::unsupported(
                                "Last requires the ordering to be established with OrderBy",
                            ));
                        }
                        ResultCardinality::Last { or_default }
                    }
                };
                state.stage = Stage::Terminal;
            }
        }
        Ok(())
    }

    /// Reject an operator appearing after a stage it cannot follow
    fn require_stage(&self, state: &State, at_most: Stage, op: &QueryOp) -> QueryResult<()> {
        if state.stage > at_most {
            return Err(QueryError::unsupported(format!(
                "{} cannot follow {}",
                op_name(op),
                stage_name(state.stage)
            )));
        }
        Ok(())
    }

    fn add_predicate(&self, state: &mut State, predicate: &Lambda, root_type: &str) -> QueryResult<()> {
        let scope = self.scope(predicate, root_type)?;
        let filter = self.translate_predicate(&predicate.body, &scope)?;
        for conjunct in split_conjuncts(filter) {
            state.node.add_filter(conjunct);
        }
        Ok(())
    }

    fn terminal_predicate(
        &self,
        state: &mut State,
        predicate: Option<&Lambda>,
        root_type: &str,
    ) -> QueryResult<()> {
        if let Some(predicate) = predicate {
            if state.stage > Stage::Ordered {
                return Err(QueryError::unsupported(
                    "a predicate on a terminal operator cannot follow Skip/Take/Select",
                ));
            }
            self.add_predicate(state, predicate, root_type)?;
        }
        Ok(())
    }

    fn set_aggregation(
        &self,
        state: &mut State,
        kind: AggregateKind,
        selector: Option<&Lambda>,
        root_type: &str,
    ) -> QueryResult<()> {
        if state.stage == Stage::Projected {
            return Err(QueryError::unsupported(format!(
                "{:?} over a projection is not supported; pass a selector instead",
                kind
            )));
        }

        let (field, nullable) = match selector {
            None => (None, false),
            Some(selector) => {
                let scope = self.scope(selector, root_type)?;
                let field = self.resolve_field(&selector.body, &scope)?;
                let numeric_only = matches!(kind, AggregateKind::Sum | AggregateKind::Average);
                if numeric_only && !is_numeric(&field.declared) {
                    return Err(QueryError::unsupported(format!(
                        "{:?} requires a numeric field, '{}' is {:?}",
                        kind, field.property, field.declared
                    )));
                }
                if field.declared.as_scalar().is_none() {
                    return Err(QueryError::unsupported(format!(
                        "{:?} requires a scalar field, '{}' is {:?}",
                        kind, field.property, field.declared
                    )));
                }
                let nullable = self.is_nullable(&field, root_type)?;
                (Some(field), nullable)
            }
        };

        state.node.aggregation = Some(Aggregation {
            kind,
            field,
            nullable,
        });
        state.stage = Stage::Terminal;
        Ok(())
    }

    fn is_nullable(&self, field: &FieldRef, root_type: &str) -> QueryResult<bool> {
        let mut descriptor = self.model.type_descriptor(root_type)?;
        let names: Vec<&str> = field.property.split('.').collect();
        for (i, name) in names.iter().enumerate() {
            let Some(property) = descriptor.property(name) else {
                return Ok(false);
            };
            if i + 1 == names.len() {
                return Ok(property.nullable);
            }
            if let crate::metadata::DeclaredType::Complex(next) = &property.declared {
                descriptor = self.model.type_descriptor(next)?;
            }
        }
        Ok(false)
    }

    pub(crate) fn order_clause(&self, key: &Lambda, type_name: &str, descending: bool) -> QueryResult<OrderClause> {
        let scope = self.scope(key, type_name)?;
        let field = self.resolve_field(&key.body, &scope)?;
        if field.declared.is_collection() {
            return Err(QueryError::unsupported(format!(
                "cannot order by collection field '{}'",
                field.property
            )));
        }
        Ok(OrderClause {
            field,
            direction: if descending {
                Direction::Descending
            } else {
                Direction::Ascending
            },
        })
    }

    pub(crate) fn filter_for(&self, predicate: &Lambda, scope_type: &str) -> QueryResult<Vec<FilterNode>> {
        let scope: Scope<'m> = self.scope(predicate, scope_type)?;
        Ok(split_conjuncts(self.translate_predicate(&predicate.body, &scope)?))
    }
}

/// Break a top-level conjunction into separate AND-list entries
fn split_conjuncts(node: FilterNode) -> Vec<FilterNode> {
    match node {
        FilterNode::And(members) => members.into_iter().flat_map(split_conjuncts).collect(),
        other => vec![other],
    }
}

fn constant_count(value: &ValueExpr, operator: &str) -> QueryResult<u64> {
    match value {
        ValueExpr::Constant(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            QueryError::unsupported(format!("{} count must be a non-negative integer, got {}", operator, n))
        }),
        other => Err(QueryError::unsupported(format!(
            "repeated paging requires constant counts; {} got {:?}",
            operator, other
        ))),
    }
}

fn op_name(op: &QueryOp) -> &'static str {
    match op {
        QueryOp::Where(_) => "Where",
        QueryOp::OrderBy { .. } => "OrderBy",
        QueryOp::ThenBy { .. } => "ThenBy",
        QueryOp::Skip(_) => "Skip",
        QueryOp::Take(_) => "Take",
        QueryOp::TakeLast(_) => "TakeLast",
        QueryOp::Select(_) => "Select",
        QueryOp::Include(_) => "Include",
        QueryOp::ThenInclude(_) => "ThenInclude",
        QueryOp::Count(_) => "Count",
        QueryOp::Any(_) => "Any",
        QueryOp::Sum(_) => "Sum",
        QueryOp::Average(_) => "Average",
        QueryOp::Min(_) => "Min",
        QueryOp::Max(_) => "Max",
        QueryOp::Element { op, .. } => match op {
            ElementOp::First => "First",
            ElementOp::Single => "Single",
            ElementOp::Last => "Last",
        },
    }
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Filtering => "filtering",
        Stage::Ordered => "OrderBy",
        Stage::Paged => "Skip/Take",
        Stage::Projected => "Select",
        Stage::Terminal => "a terminal operator",
    }
}

/// Whether an expression is the bare lambda parameter
pub(crate) fn is_parameter(expr: &Expr, parameter: &str) -> bool {
    matches!(expr.unwrap_convert(), Expr::Param(p) if p == parameter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{constant, lambda, param, variable};
    use crate::metadata::{DeclaredType, PropertyDescriptor, TypeDescriptor};
    use serde_json::json;

    fn model() -> Model {
        Model::new().with_type(
            TypeDescriptor::entity("Product", "products", "Id")
                .with_property(PropertyDescriptor::new("Id", DeclaredType::string()))
                .with_property(PropertyDescriptor::new("Category", DeclaredType::string()))
                .with_property(PropertyDescriptor::new("Price", DeclaredType::float()))
                .with_property(PropertyDescriptor::new("Discount", DeclaredType::float()).nullable())
                .with_property(PropertyDescriptor::new("Name", DeclaredType::string())),
        )
    }

    fn p(name: &str) -> Expr {
        param("p").member(name)
    }

    #[test]
    fn test_translate_filter_order_page() {
        let model = model();
        let query = QueryExpr::from("Product")
            .filter(lambda("p", p("Category").equal_const("Electronics")))
            .order_by_descending(lambda("p", p("Price")))
            .skip_const(1)
            .take_const(2);
        let node = Translator::new(&model).translate(&query).unwrap();

        assert_eq!(node.collection, "products");
        assert_eq!(node.filters.len(), 1);
        assert_eq!(node.order_by.len(), 1);
        assert_eq!(node.order_by[0].direction, Direction::Descending);
        assert_eq!(node.skip, Some(ValueExpr::constant(1)));
        assert_eq!(node.limit, Some(ValueExpr::constant(2)));
        assert_eq!(node.projection, Projection::Entity);
    }

    #[test]
    fn test_key_equality_is_fast_path() {
        let model = model();
        let query = QueryExpr::from("Product").filter(lambda("p", p("Id").equal(variable("id"))));
        let node = Translator::new(&model).translate(&query).unwrap();
        assert_eq!(node.target, QueryTarget::Document(ValueExpr::parameter("id")));
        assert!(node.filters.is_empty());
    }

    #[test]
    fn test_and_splits_into_filters() {
        let model = model();
        let query = QueryExpr::from("Product").filter(lambda(
            "p",
            p("Category")
                .equal_const("A")
                .and(p("Price").greater_than(constant(3)))
                .and(p("Name").equal_const("x").or(p("Name").equal_const("y"))),
        ));
        let node = Translator::new(&model).translate(&query).unwrap();
        assert_eq!(node.filters.len(), 3);
        assert!(node.has_or_groups());
    }

    #[test]
    fn test_paging_folds_constants() {
        let model = model();
        let query = QueryExpr::from("Product").take_const(10).skip_const(3).take_const(5);
        let node = Translator::new(&model).translate(&query).unwrap();
        assert_eq!(node.skip, Some(ValueExpr::constant(3)));
        assert_eq!(node.limit, Some(ValueExpr::constant(5)));

        let query = QueryExpr::from("Product").take(variable("n")).skip(variable("k"));
        assert!(Translator::new(&model).translate(&query).is_err());
    }

    #[test]
    fn test_operator_order_rules() {
        let model = model();
        let bad = vec![
            QueryExpr::from("Product")
                .take_const(2)
                .filter(lambda("p", p("Price").greater_than(constant(1)))),
            QueryExpr::from("Product").then_by(lambda("p", p("Price"))),
            QueryExpr::from("Product").take_last(constant(2)),
            QueryExpr::from("Product").count().take_const(1),
            QueryExpr::from("Product").last(),
            QueryExpr::from("Product").sum(lambda("p", p("Name"))),
        ];
        for query in bad {
            assert!(
                matches!(Translator::new(&model).translate(&query), Err(QueryError::UnsupportedQuery(_))),
                "expected rejection of {:?}",
                query.ops
            );
        }
    }

    #[test]
    fn test_aggregations() {
        let model = model();
        let query = QueryExpr::from("Product")
            .filter(lambda("p", p("Category").equal_const("A")))
            .min(lambda("p", p("Discount")));
        let node = Translator::new(&model).translate(&query).unwrap();
        let aggregation = node.aggregation.unwrap();
        assert_eq!(aggregation.kind, AggregateKind::Min);
        assert!(aggregation.nullable);
        assert_eq!(aggregation.field.unwrap().path, "Discount");

        let query = QueryExpr {
            root: "Product".to_string(),
            ops: vec![QueryOp::Count(Some(lambda("p", p("Price").less_than(constant(json!(5))))))],
        };
        let node = Translator::new(&model).translate(&query).unwrap();
        assert_eq!(node.filters.len(), 1);
        assert_eq!(node.aggregation.unwrap().kind, AggregateKind::Count);
    }

    #[test]
    fn test_element_operators() {
        let model = model();
        let query = QueryExpr::from("Product")
            .order_by(lambda("p", p("Price")))
            .last();
        let node = Translator::new(&model).translate(&query).unwrap();
        assert_eq!(node.cardinality, ResultCardinality::Last { or_default: false });

        let query = QueryExpr::from("Product").single_or_default();
        let node = Translator::new(&model).translate(&query).unwrap();
        assert_eq!(node.cardinality, ResultCardinality::Single { or_default: true });
    }

    #[test]
    fn test_unknown_root() {
        let model = model();
        assert!(matches!(
            Translator::new(&model).translate(&QueryExpr::from("Nope")),
            Err(QueryError::UnknownType(_))
        ));
    }
}
