//! Include translation.
//!
//! `Include(c => c.Orders.Where(..).OrderBy(..).Take(n))` becomes an
//! `IncludeInfo` with its own filter/order/limit/skip sub-plan.
//! `ThenInclude` nests under the most recent include, and repeated paths
//! merge into one tree.

use crate::ast::{IncludeInfo, QueryNode};
use crate::error::{QueryError, QueryResult};
use crate::expr::{Expr, Lambda, Method};

use super::predicate::value_expr;
use super::{describe, is_parameter, Translator};

/// Operator applied to a navigation inside an include lambda
enum NavigationOp<'a> {
    Where(&'a Lambda),
    OrderBy(&'a Lambda, bool),
    ThenBy(&'a Lambda, bool),
    Skip(&'a Expr),
    Take(&'a Expr),
}

impl<'m> Translator<'m> {
    /// Add an include below `parent` (or at the root) and return the cursor
    /// of the deepest include created or reused.
    pub(crate) fn add_include(
        &self,
        node: &mut QueryNode,
        parent: Option<Vec<usize>>,
        navigation: &Lambda,
        root_type: &str,
    ) -> QueryResult<Vec<usize>> {
        let mut cursor = parent.unwrap_or_default();
        let mut current_type = Some(type_at(self, node, &cursor, root_type)?);

        let (segments, ops) = parse_navigation(&navigation.body, &navigation.parameter)?;

        let mut remaining = segments.as_slice();
        while let Some(first) = remaining.first() {
            let target = current_type
                .as_deref()
                .and_then(|t| self.model.type_descriptor(t).ok())
                .and_then(|d| d.navigation(first))
                .map(|n| n.target.clone());

            // an unresolvable segment keeps the rest of the path verbatim;
            // the resolver reports why it is invalid
            let (name, consumed) = match &target {
                Some(_) => (first.clone(), 1),
                None => (remaining.join("."), remaining.len()),
            };
            let is_last = consumed == remaining.len();

            let mut info = IncludeInfo::new(&name);
            if is_last && !ops.is_empty() {
                let Some(target_type) = target.as_deref() else {
                    return Err(QueryError::InvalidInclude {
                        path: name,
                        reason: "filtered include on a path that is not a navigation".to_string(),
                    });
                };
                self.apply_navigation_ops(&mut info, &ops, target_type)?;
            }

            let index = merge_include(includes_at(node, &cursor), info)?;
            cursor.push(index);
            current_type = target;
            remaining = &remaining[consumed..];
        }

        Ok(cursor)
    }

    fn apply_navigation_ops(
        &self,
        info: &mut IncludeInfo,
        ops: &[NavigationOp<'_>],
        target_type: &str,
    ) -> QueryResult<()> {
        let mut paged = false;
        for op in ops {
            match op {
                NavigationOp::Where(predicate) => {
                    if paged {
                        return Err(QueryError::unsupported(format!(
                            "Where after Skip/Take inside include '{}'",
                            info.navigation
                        )));
                    }
                    info.filters.extend(self.filter_for(predicate, target_type)?);
                }
                NavigationOp::OrderBy(key, descending) => {
                    if paged {
                        return Err(QueryError::unsupported(format!(
                            "OrderBy after Skip/Take inside include '{}'",
                            info.navigation
                        )));
                    }
                    info.order_by = vec![self.order_clause(key, target_type, *descending)?];
                }
                NavigationOp::ThenBy(key, descending) => {
                    if info.order_by.is_empty() {
                        return Err(QueryError::unsupported(format!(
                            "ThenBy without OrderBy inside include '{}'",
                            info.navigation
                        )));
                    }
                    info.order_by.push(self.order_clause(key, target_type, *descending)?);
                }
                NavigationOp::Skip(count) => {
                    if info.skip.is_some() || info.limit.is_some() {
                        return Err(QueryError::unsupported(format!(
                            "Skip must come once and before Take inside include '{}'",
                            info.navigation
                        )));
                    }
                    info.skip = Some(value_expr(count)?);
                    paged = true;
                }
                NavigationOp::Take(count) => {
                    if info.limit.is_some() {
                        return Err(QueryError::unsupported(format!(
                            "repeated Take inside include '{}'",
                            info.navigation
                        )));
                    }
                    info.limit = Some(value_expr(count)?);
                    paged = true;
                }
            }
        }
        Ok(())
    }
}

/// Split an include body into member segments and trailing operators.
fn parse_navigation<'a>(expr: &'a Expr, parameter: &str) -> QueryResult<(Vec<String>, Vec<NavigationOp<'a>>)> {
    match expr.unwrap_convert() {
        Expr::Member { target, name } => {
            if is_parameter(target, parameter) {
                return Ok((vec![name.clone()], Vec::new()));
            }
            let (mut segments, ops) = parse_navigation(target, parameter)?;
            if !ops.is_empty() {
                return Err(QueryError::unsupported(format!(
                    "member '{}' after an operator inside an include",
                    name
                )));
            }
            segments.push(name.clone());
            Ok((segments, ops))
        }
        Expr::Call {
            method,
            target: Some(inner),
            args,
        } => {
            let (segments, mut ops) = parse_navigation(inner, parameter)?;
            let op = match (method, args.as_slice()) {
                (Method::Where, [Expr::Lambda(l)]) => NavigationOp::Where(l),
                (Method::OrderBy, [Expr::Lambda(l)]) => NavigationOp::OrderBy(l, false),
                (Method::OrderByDescending, [Expr::Lambda(l)]) => NavigationOp::OrderBy(l, true),
                (Method::ThenBy, [Expr::Lambda(l)]) => NavigationOp::ThenBy(l, false),
                (Method::ThenByDescending, [Expr::Lambda(l)]) => NavigationOp::ThenBy(l, true),
                (Method::Skip, [count]) => NavigationOp::Skip(count),
                (Method::Take, [count]) => NavigationOp::Take(count),
                (other, _) => {
                    return Err(QueryError::unsupported(format!(
                        "{:?} is not supported inside an include",
                        other
                    )))
                }
            };
            ops.push(op);
            Ok((segments, ops))
        }
        other => Err(QueryError::unsupported(format!(
            "include navigation {} must be a member access on '{}'",
            describe(other),
            parameter
        ))),
    }
}

/// Resolve the entity type at an include cursor
fn type_at(translator: &Translator<'_>, node: &QueryNode, cursor: &[usize], root_type: &str) -> QueryResult<String> {
    let mut current = root_type.to_string();
    let mut level = &node.includes;
    for &index in cursor {
        let info = &level[index];
        let descriptor = translator.model.type_descriptor(&current)?;
        current = descriptor
            .navigation(&info.navigation)
            .map(|n| n.target.clone())
            .ok_or_else(|| QueryError::InvalidInclude {
                path: info.navigation.clone(),
                reason: format!("'{}' has no navigation with this name", current),
            })?;
        level = &info.nested;
    }
    Ok(current)
}

fn includes_at<'a>(node: &'a mut QueryNode, cursor: &[usize]) -> &'a mut Vec<IncludeInfo> {
    let mut level = &mut node.includes;
    for &index in cursor {
        level = &mut level[index].nested;
    }
    level
}

/// Merge an include into a level, returning its index
fn merge_include(level: &mut Vec<IncludeInfo>, info: IncludeInfo) -> QueryResult<usize> {
    if let Some(index) = level.iter().position(|i| i.navigation == info.navigation) {
        let existing = &mut level[index];
        if info.has_sub_plan() {
            if existing.has_sub_plan() && !same_sub_plan(existing, &info) {
                return Err(QueryError::unsupported(format!(
                    "conflicting filtered includes for '{}'",
                    info.navigation
                )));
            }
            existing.filters = info.filters;
            existing.order_by = info.order_by;
            existing.limit = info.limit;
            existing.skip = info.skip;
        }
        return Ok(index);
    }
    level.push(info);
    Ok(level.len() - 1)
}

fn same_sub_plan(a: &IncludeInfo, b: &IncludeInfo) -> bool {
    a.filters == b.filters && a.order_by == b.order_by && a.limit == b.limit && a.skip == b.skip
}
