//! Decide whether a pre-aggregation can answer a compiled query.
//!
//! A pre-aggregation qualifies when every member the query touches lives
//! on its cube's own instance and is stored at a grain that rolls up
//! to the requested one. `countDistinct` does not merge across rows, so
//! it only qualifies when no rows would be merged.
//!
//! Among qualifying pre-aggregations the one with the fewest unused dimensions wins;
//! ties go to declaration order.

use std::sync::Arc;

use super::rollup::RollupPlan;
use super::store::{MaterializedPreAgg, PreAggStore};
use crate::model::{Cube, PreAggregation, ResolvedMember};
use crate::query::{CompileResult, CompiledQuery, FilterNode};
use crate::schema::{pre_aggregation_key, Catalog};

/// A spec that can serve a query.
#[derive(Debug, Clone)]
pub struct Candidate<'c> {
    pub key: String,
    pub cube: &'c Cube,
    pub spec: &'c PreAggregation,
    /// Stored grouping columns the query does not use.
    pub extra_dimensions: usize,
}

/// A candidate with a materialized rowset ready to serve.
#[derive(Debug, Clone)]
pub struct PreAggMatch {
    pub key: String,
    pub materialized: Arc<MaterializedPreAgg>,
    pub plan: RollupPlan,
}

impl PreAggMatch {
    pub fn execute(&self) -> crate::driver::QueryResult {
        self.plan.execute(&self.materialized.data)
    }
}

/// Every spec that can serve `compiled`, best first.
pub fn candidates<'c>(catalog: &'c Catalog, compiled: &CompiledQuery) -> Vec<Candidate<'c>> {
    let mut found: Vec<Candidate<'c>> = catalog
        .pre_aggregations()
        .filter_map(|(cube, spec)| {
            qualifies(catalog, cube, spec, compiled).map(|extra_dimensions| Candidate {
                key: pre_aggregation_key(cube, spec),
                cube,
                spec,
                extra_dimensions,
            })
        })
        .collect();
    // Stable: declaration order breaks ties.
    found.sort_by_key(|c| c.extra_dimensions);
    found
}

/// The best spec for `compiled`, if any.
pub fn find_match<'c>(catalog: &'c Catalog, compiled: &CompiledQuery) -> Option<&'c PreAggregation> {
    candidates(catalog, compiled).into_iter().next().map(|c| c.spec)
}

/// The best candidate whose materialized rows are servable and were built
/// from the current definition.
pub fn match_materialized(
    catalog: &Catalog,
    store: &PreAggStore,
    compiled: &CompiledQuery,
) -> CompileResult<Option<PreAggMatch>> {
    for candidate in candidates(catalog, compiled) {
        let Some(materialized) = store.get(&candidate.key) else {
            continue;
        };
        if !materialized.is_servable()
            || materialized.fingerprint != catalog.fingerprint(candidate.cube, candidate.spec)
        {
            tracing::debug!(preagg = %candidate.key, "candidate not materialized");
            continue;
        }
        let plan = RollupPlan::new(catalog, candidate.cube, candidate.spec, compiled)?;
        tracing::debug!(preagg = %candidate.key, extra = candidate.extra_dimensions, "pre-aggregation matched");
        return Ok(Some(PreAggMatch {
            key: candidate.key,
            materialized,
            plan,
        }));
    }
    Ok(None)
}

/// `Some(extra dimensions)` if `spec` can serve `compiled`.
fn qualifies(
    catalog: &Catalog,
    cube: &Cube,
    spec: &PreAggregation,
    compiled: &CompiledQuery,
) -> Option<usize> {
    let base = catalog.base_instance(cube.id);
    let owned = |m: &ResolvedMember| m.instance == base;

    let measure_filters: Vec<&ResolvedMember> = compiled
        .measure_filters()
        .flat_map(FilterNode::members)
        .collect();
    let measures = compiled.measures.iter().chain(measure_filters.iter().copied());
    let mut additive = true;
    for member in measures {
        if !owned(member) || !spec.measures.contains(&member.index) {
            return None;
        }
        additive &= catalog.measure(member)?.aggregation.is_additive();
    }

    let mut used: Vec<usize> = Vec::new();
    let dimensions = compiled
        .dimensions
        .iter()
        .chain(compiled.dimension_filters().flat_map(FilterNode::members));
    for member in dimensions {
        if !owned(member) || !spec.dimensions.contains(&member.index) {
            return None;
        }
        if !used.contains(&member.index) {
            used.push(member.index);
        }
    }

    let mut grouped_by_time = false;
    let mut exact_grain = true;
    for td in &compiled.time_dimensions {
        if !owned(&td.member) {
            return None;
        }
        let stored = spec.time_dimension == Some(td.member.index);
        if let Some(granularity) = td.granularity {
            let spec_grain = spec.granularity.filter(|_| stored)?;
            if !spec_grain.can_roll_up_to(granularity) {
                return None;
            }
            exact_grain &= spec_grain == granularity;
            grouped_by_time = true;
        }
        if let Some(range) = &td.date_range {
            if stored {
                if !range.is_aligned_to(spec.granularity?) {
                    return None;
                }
            } else if spec.dimensions.contains(&td.member.index) {
                if !used.contains(&td.member.index) {
                    used.push(td.member.index);
                }
            } else {
                return None;
            }
        }
    }

    let extra_time = usize::from(spec.time_dimension.is_some() && !grouped_by_time);
    let extra = spec.dimensions.len().saturating_sub(used.len()) + extra_time;

    if !additive && (extra > 0 || !exact_grain) {
        return None;
    }
    Some(extra)
}
