//! Predicate translation.
//!
//! Each rule matches one upstream shape and produces a filter node:
//! - comparisons (`x.F op value`, either operand order)
//! - `x.Tags.Contains(v)` → ArrayContains
//! - `list.Contains(x.F)` (instance or static) → In
//! - `x.Tags.Any(t => list.Contains(t))` → ArrayContainsAny
//! - `Equals(a, b)` / `a.Equals(b)` with boxing stripped
//! - AND / OR / NOT, NOT pushed inward
//!
//! Anything else is an `UnsupportedQuery` error.

use serde_json::Value;

use crate::ast::{FieldRef, FilterNode, FilterOperator, OrFilterGroup, ValueExpr, WhereClause};
use crate::error::{QueryError, QueryResult};
use crate::expr::{BinaryOp, Expr, Lambda, Method};
use crate::metadata::{DeclaredType, ScalarType, TypeDescriptor};

use super::Translator;

/// Lambda parameter bound to rows of one type
#[derive(Debug, Clone)]
pub(crate) struct Scope<'m> {
    pub parameter: String,
    pub descriptor: &'m TypeDescriptor,
}

impl<'m> Translator<'m> {
    pub(crate) fn scope(&self, lambda: &Lambda, type_name: &str) -> QueryResult<Scope<'m>> {
        Ok(Scope {
            parameter: lambda.parameter.clone(),
            descriptor: self.model.type_descriptor(type_name)?,
        })
    }

    /// Translate a boolean predicate into a filter node.
    pub(crate) fn translate_predicate(&self, expr: &Expr, scope: &Scope<'m>) -> QueryResult<FilterNode> {
        match expr.unwrap_convert() {
            Expr::Binary { op, left, right } => match op {
                BinaryOp::AndAlso => {
                    let mut members = Vec::new();
                    push_conjunct(&mut members, self.translate_predicate(left, scope)?);
                    push_conjunct(&mut members, self.translate_predicate(right, scope)?);
                    Ok(FilterNode::And(members))
                }
                BinaryOp::OrElse => Ok(FilterNode::Or(OrFilterGroup {
                    members: vec![
                        self.translate_predicate(left, scope)?,
                        self.translate_predicate(right, scope)?,
                    ],
                })),
                comparison => self.translate_comparison(comparison_operator(*comparison), left, right, scope),
            },
            Expr::Not(inner) => self.translate_negation(inner, scope),
            Expr::Call {
                method,
                target,
                args,
            } => self.translate_call(*method, target.as_deref(), args, scope),
            member @ Expr::Member { .. } => {
                let field = self.resolve_field(member, scope)?;
                if field.declared != DeclaredType::bool() {
                    return Err(QueryError::unsupported(format!(
                        "'{}' is not a boolean and cannot be used as a predicate",
                        field.property
                    )));
                }
                Ok(FilterNode::Where(WhereClause::new(
                    field,
                    FilterOperator::EqualTo,
                    ValueExpr::Constant(Value::Bool(true)),
                )))
            }
            other => Err(QueryError::unsupported(format!(
                "predicate shape {} cannot be translated",
                describe(other)
            ))),
        }
    }

    fn translate_negation(&self, inner: &Expr, scope: &Scope<'m>) -> QueryResult<FilterNode> {
        let inner = inner.unwrap_convert();
        if let Expr::Member { .. } = inner {
            let field = self.resolve_field(inner, scope)?;
            if field.declared == DeclaredType::bool() {
                return Ok(FilterNode::Where(WhereClause::new(
                    field,
                    FilterOperator::EqualTo,
                    ValueExpr::Constant(Value::Bool(false)),
                )));
            }
        }
        if let Expr::Not(double) = inner {
            return self.translate_predicate(double, scope);
        }
        negate(self.translate_predicate(inner, scope)?)
    }

    fn translate_comparison(
        &self,
        operator: FilterOperator,
        left: &Expr,
        right: &Expr,
        scope: &Scope<'m>,
    ) -> QueryResult<FilterNode> {
        let left_is_field = self.is_field(left, scope);
        let right_is_field = self.is_field(right, scope);

        let (field, operator, value) = match (left_is_field, right_is_field) {
            (true, false) => (self.resolve_field(left, scope)?, operator, value_expr(right)?),
            (false, true) => (
                self.resolve_field(right, scope)?,
                operator.mirrored(),
                value_expr(left)?,
            ),
            (true, true) => {
                return Err(QueryError::unsupported(
                    "comparing two document fields is not supported by the store",
                ))
            }
            (false, false) => {
                return Err(QueryError::unsupported(format!(
                    "comparison between {} and {} does not reference a document field",
                    describe(left),
                    describe(right)
                )))
            }
        };

        if field.declared.is_collection() {
            return Err(QueryError::unsupported(format!(
                "'{}' is a collection; use Contains/Any to filter on its elements",
                field.property
            )));
        }

        Ok(FilterNode::Where(WhereClause::new(field, operator, value)))
    }

    fn translate_call(
        &self,
        method: Method,
        target: Option<&Expr>,
        args: &[Expr],
        scope: &Scope<'m>,
    ) -> QueryResult<FilterNode> {
        match (method, target, args) {
            (Method::Equals, Some(receiver), [other]) => {
                self.translate_comparison(FilterOperator::EqualTo, receiver, other, scope)
            }
            (Method::Equals, None, [left, right]) => {
                self.translate_comparison(FilterOperator::EqualTo, left, right, scope)
            }
            (Method::Contains, Some(receiver), [item]) => self.translate_contains(receiver, item, scope),
            (Method::Contains, None, [source, item]) => self.translate_contains(source, item, scope),
            (Method::Any, Some(receiver), [Expr::Lambda(predicate)]) => {
                self.translate_any(receiver, predicate, scope)
            }
            (Method::Any, None, [source, Expr::Lambda(predicate)]) => {
                self.translate_any(source, predicate, scope)
            }
            (method, _, _) => Err(QueryError::unsupported(format!(
                "method call {:?} with {} argument(s) cannot be translated to a filter",
                method,
                args.len()
            ))),
        }
    }

    fn translate_contains(&self, source: &Expr, item: &Expr, scope: &Scope<'m>) -> QueryResult<FilterNode> {
        if self.is_field(source, scope) {
            let field = self.resolve_field(source, scope)?;
            if !field.declared.is_collection() {
                return Err(QueryError::unsupported(format!(
                    "Contains on non-collection field '{}' is not supported by the store",
                    field.property
                )));
            }
            return Ok(FilterNode::Where(WhereClause::new(
                field,
                FilterOperator::ArrayContains,
                value_expr(item)?,
            )));
        }

        if self.is_field(item, scope) {
            let field = self.resolve_field(item, scope)?;
            return Ok(FilterNode::Where(WhereClause::new(
                field,
                FilterOperator::In,
                list_value_expr(source)?,
            )));
        }

        Err(QueryError::unsupported(format!(
            "Contains between {} and {} does not reference a document field",
            describe(source),
            describe(item)
        )))
    }

    fn translate_any(&self, source: &Expr, predicate: &Lambda, scope: &Scope<'m>) -> QueryResult<FilterNode> {
        if !self.is_field(source, scope) {
            return Err(QueryError::unsupported(format!(
                "Any over {} does not reference a document field",
                describe(source)
            )));
        }
        let field = self.resolve_field(source, scope)?;
        if !field.declared.is_collection() {
            return Err(QueryError::unsupported(format!(
                "Any on non-collection field '{}'",
                field.property
            )));
        }

        // only `t => list.Contains(t)` maps to a store primitive
        let element = Expr::Param(predicate.parameter.clone());
        let list = match predicate.body.unwrap_convert() {
            Expr::Call {
                method: Method::Contains,
                target: Some(list),
                args,
            } if args.len() == 1 && args[0].unwrap_convert() == &element => &**list,
            Expr::Call {
                method: Method::Contains,
                target: None,
                args,
            } if args.len() == 2 && args[1].unwrap_convert() == &element => &args[0],
            other => {
                return Err(QueryError::unsupported(format!(
                    "Any predicate {} on '{}' must have the form t => list.Contains(t)",
                    describe(other),
                    field.property
                )))
            }
        };

        Ok(FilterNode::Where(WhereClause::new(
            field,
            FilterOperator::ArrayContainsAny,
            list_value_expr(list)?,
        )))
    }

    /// Whether `expr` is a member chain rooted at the scope parameter
    pub(crate) fn is_field(&self, expr: &Expr, scope: &Scope<'m>) -> bool {
        match expr.unwrap_convert() {
            Expr::Member { target, .. } => match target.unwrap_convert() {
                Expr::Param(p) => p == &scope.parameter,
                inner @ Expr::Member { .. } => self.is_field(inner, scope),
                _ => false,
            },
            _ => false,
        }
    }

    /// Resolve a member chain to the stored field it reads.
    pub(crate) fn resolve_field(&self, expr: &Expr, scope: &Scope<'m>) -> QueryResult<FieldRef> {
        let mut names = Vec::new();
        let mut current = expr.unwrap_convert();
        loop {
            match current {
                Expr::Member { target, name } => {
                    names.push(name.as_str());
                    current = target.unwrap_convert();
                }
                Expr::Param(p) if p == &scope.parameter => break,
                other => {
                    return Err(QueryError::unsupported(format!(
                        "member access on {} is not rooted at '{}'",
                        describe(other),
                        scope.parameter
                    )))
                }
            }
        }
        names.reverse();
        self.field_for_path(scope.descriptor, &names)
    }

    /// Resolve property names, walking through complex properties.
    pub(crate) fn field_for_path(&self, root: &'m TypeDescriptor, names: &[&str]) -> QueryResult<FieldRef> {
        let mut descriptor = root;
        let mut stored = Vec::with_capacity(names.len());
        let mut written = Vec::with_capacity(names.len());

        for (i, name) in names.iter().enumerate() {
            let last = i + 1 == names.len();
            let Some(property) = descriptor.property(name) else {
                let reason = if descriptor.navigation(name).is_some() {
                    "is a navigation and cannot be filtered, ordered or projected"
                } else {
                    "is not a mapped property"
                };
                return Err(QueryError::unsupported(format!(
                    "'{}' on type '{}' {}",
                    name, descriptor.name, reason
                )));
            };
            if property.ignored {
                return Err(QueryError::unsupported(format!(
                    "'{}' on type '{}' is not persisted",
                    name, descriptor.name
                )));
            }
            written.push(property.name.as_str());

            if i == 0 && descriptor.is_key(name) && last {
                let mut field = FieldRef::document_id(name);
                field.declared = property.declared.clone();
                return Ok(field);
            }
            stored.push(property.stored_name());

            if last {
                return Ok(FieldRef {
                    path: stored.join("."),
                    property: written.join("."),
                    declared: property.declared.clone(),
                    persist_null: property.persist_null,
                    enum_hint: property.declared.enum_name().map(str::to_string),
                });
            }

            match &property.declared {
                DeclaredType::Complex(type_name) => {
                    descriptor = self.model.type_descriptor(type_name)?;
                }
                other => {
                    return Err(QueryError::unsupported(format!(
                        "cannot access '{}' on '{}' of type {:?}",
                        names[i + 1],
                        name,
                        other
                    )))
                }
            }
        }

        Err(QueryError::unsupported("empty member path"))
    }
}

fn comparison_operator(op: BinaryOp) -> FilterOperator {
    match op {
        BinaryOp::Equal => FilterOperator::EqualTo,
        BinaryOp::NotEqual => FilterOperator::NotEqualTo,
        BinaryOp::LessThan => FilterOperator::LessThan,
        BinaryOp::LessThanOrEqual => FilterOperator::LessThanOrEqualTo,
        BinaryOp::GreaterThan => FilterOperator::GreaterThan,
        BinaryOp::GreaterThanOrEqual => FilterOperator::GreaterThanOrEqualTo,
        // callers handle the logical operators before reaching here
        BinaryOp::AndAlso | BinaryOp::OrElse => unreachable!("logical operator is not a comparison"),
    }
}

fn push_conjunct(members: &mut Vec<FilterNode>, node: FilterNode) {
    match node {
        FilterNode::And(inner) => members.extend(inner),
        other => members.push(other),
    }
}

/// Push a negation through a translated node.
fn negate(node: FilterNode) -> QueryResult<FilterNode> {
    match node {
        FilterNode::Where(mut clause) => match clause.operator.negated() {
            Some(operator) => {
                clause.operator = operator;
                Ok(FilterNode::Where(clause))
            }
            None => Err(QueryError::unsupported(format!(
                "negated {} on '{}' has no store equivalent",
                clause.operator, clause.field.property
            ))),
        },
        FilterNode::Or(group) => {
            let mut members = Vec::with_capacity(group.members.len());
            for member in group.members {
                push_conjunct(&mut members, negate(member)?);
            }
            Ok(FilterNode::And(members))
        }
        FilterNode::And(members) => Ok(FilterNode::Or(OrFilterGroup {
            members: members.into_iter().map(negate).collect::<QueryResult<_>>()?,
        })),
    }
}

/// Deferred value of a constant or captured variable
pub(crate) fn value_expr(expr: &Expr) -> QueryResult<ValueExpr> {
    match expr.unwrap_convert() {
        Expr::Constant(value) => Ok(ValueExpr::Constant(value.clone())),
        Expr::Variable(name) => Ok(ValueExpr::Parameter(name.clone())),
        other => Err(QueryError::unsupported(format!(
            "{} is not a constant or captured variable",
            describe(other)
        ))),
    }
}

fn list_value_expr(expr: &Expr) -> QueryResult<ValueExpr> {
    let value = value_expr(expr)?;
    if let ValueExpr::Constant(constant) = &value {
        if !constant.is_array() {
            return Err(QueryError::unsupported(format!(
                "membership test needs a list of values, got {}",
                constant
            )));
        }
    }
    Ok(value)
}

pub(crate) fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Param(p) => format!("parameter '{}'", p),
        Expr::Member { name, .. } => format!("member '{}'", name),
        Expr::Constant(v) => format!("constant {}", v),
        Expr::Variable(v) => format!("variable '{}'", v),
        Expr::Binary { op, .. } => format!("binary {:?}", op),
        Expr::Not(_) => "negation".to_string(),
        Expr::Convert(inner) => describe(inner),
        Expr::Call { method, .. } => format!("call {:?}", method),
        Expr::Lambda(_) => "lambda".to_string(),
        Expr::New { type_name, .. } => format!("new {}", type_name),
    }
}

/// Scalar types that support numeric aggregation
pub(crate) fn is_numeric(declared: &DeclaredType) -> bool {
    matches!(
        declared,
        DeclaredType::Scalar(ScalarType::Int) | DeclaredType::Scalar(ScalarType::Float)
    )
}
