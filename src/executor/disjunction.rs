//! OR handling: native folding, and disjunctive-normal-form emulation for
//! stores that cannot evaluate `Or` filters.

use std::collections::HashSet;

use docql_core::{QueryError, QueryResult, ResolvedFilter};

use crate::store::eval::compare_documents;
use crate::store::{RawDocument, StoreFilter, StoreOrder};

/// Fold an implicit-AND list into one store filter
pub(crate) fn fold(filters: &[ResolvedFilter]) -> Option<StoreFilter> {
    match filters {
        [] => None,
        [single] => Some(to_store(single)),
        many => Some(StoreFilter::And(many.iter().map(to_store).collect())),
    }
}

fn to_store(filter: &ResolvedFilter) -> StoreFilter {
    match filter {
        ResolvedFilter::Field { field, op, value } => StoreFilter::Field {
            path: field.path.clone(),
            op: *op,
            value: value.clone(),
        },
        ResolvedFilter::And(members) => StoreFilter::And(members.iter().map(to_store).collect()),
        ResolvedFilter::Or(members) => StoreFilter::Or(members.iter().map(to_store).collect()),
    }
}

/// Number of conjunctions the filter list expands into
pub(crate) fn disjunct_count(filters: &[ResolvedFilter]) -> usize {
    fn count(filter: &ResolvedFilter) -> usize {
        match filter {
            ResolvedFilter::Field { .. } => 1,
            ResolvedFilter::Or(members) => members.iter().map(count).fold(0, usize::saturating_add),
            ResolvedFilter::And(members) => members.iter().map(count).fold(1, usize::saturating_mul),
        }
    }
    filters.iter().map(count).fold(1, usize::saturating_mul)
}

pub(crate) fn check_size(filters: &[ResolvedFilter], max_disjunctions: usize) -> QueryResult<()> {
    let count = disjunct_count(filters);
    if count > max_disjunctions {
        return Err(QueryError::UnsupportedQuery(format!(
            "filter expands into {} disjunctions, the store accepts at most {}",
            count, max_disjunctions
        )));
    }
    Ok(())
}

/// Expand an implicit-AND list into disjunctive normal form.
///
/// Each returned conjunction is a list of field filters.
pub(crate) fn expand(filters: &[ResolvedFilter]) -> Vec<Vec<StoreFilter>> {
    fn expand_one(filter: &ResolvedFilter) -> Vec<Vec<StoreFilter>> {
        match filter {
            ResolvedFilter::Field { .. } => vec![vec![to_store(filter)]],
            ResolvedFilter::Or(members) => members.iter().flat_map(expand_one).collect(),
            ResolvedFilter::And(members) => product(members.iter().map(expand_one)),
        }
    }

    fn product(parts: impl Iterator<Item = Vec<Vec<StoreFilter>>>) -> Vec<Vec<StoreFilter>> {
        parts.fold(vec![Vec::new()], |acc, part| {
            acc.iter()
                .flat_map(|prefix| {
                    part.iter().map(move |conjunct| {
                        let mut combined = prefix.clone();
                        combined.extend(conjunct.iter().cloned());
                        combined
                    })
                })
                .collect()
        })
    }

    product(filters.iter().map(expand_one))
}

/// Fold a conjunction back into a single filter
pub(crate) fn conjunction(mut clauses: Vec<StoreFilter>) -> Option<StoreFilter> {
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(StoreFilter::And(clauses)),
    }
}

/// Union of per-disjunct results: deduplicated by path, in query order
pub(crate) fn merge(results: Vec<Vec<RawDocument>>, order_by: &[StoreOrder]) -> Vec<RawDocument> {
    let mut seen = HashSet::new();
    let mut merged: Vec<RawDocument> = results
        .into_iter()
        .flatten()
        .filter(|doc| seen.insert(doc.path.clone()))
        .collect();
    merged.sort_by(|a, b| compare_documents(a, b, order_by));
    merged
}
