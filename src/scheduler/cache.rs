// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Part of the MIND project (Machine Intelligence Native Design).

use log::debug;

use crate::ir::OpId;

use super::{
    anneal, kahn_order, DependencyGraph, RequireOptimalSchedule, SchedulerError,
    SchedulerOptions,
};

/// Run both scheduling phases (the second only when `optimal` is required)
/// and return the op order.
pub fn compute_schedule(
    dag: &DependencyGraph,
    optimal: RequireOptimalSchedule,
    options: &SchedulerOptions,
) -> Result<Vec<OpId>, SchedulerError> {
    let optimal = optimal == RequireOptimalSchedule::Yes;
    let use_closure = optimal && dag.num_nodes() <= options.transitive_closure_threshold;
    let order = kahn_order(dag, options, use_closure)?;
    if !optimal {
        return Ok(dag.ops_in(&order));
    }

    let (order, stats) = anneal(dag, order, options);
    debug!(
        "annealed {} ops: peak {} -> {}, {} of {} swaps accepted in {:?}",
        dag.num_ops(),
        stats.initial.0,
        stats.best.0,
        stats.accepted,
        stats.proposals,
        stats.elapsed
    );
    Ok(dag.ops_in(&order))
}

#[derive(Debug, Clone)]
struct CachedSchedule {
    dag: DependencyGraph,
    order: Vec<OpId>,
    optimal: bool,
}

/// Remembers the last schedule and the dependency graph it was computed
/// for.
///
/// A query hits when the dependency graph is unchanged, unless it needs an
/// optimal order and the cached one was produced without annealing.
#[derive(Debug, Default)]
pub struct ScheduleCacher {
    cached: Option<CachedSchedule>,
    hits: u64,
    misses: u64,
}

impl ScheduleCacher {
    pub fn schedule(
        &mut self,
        dag: DependencyGraph,
        optimal: RequireOptimalSchedule,
        options: &SchedulerOptions,
    ) -> Result<Vec<OpId>, SchedulerError> {
        let need_optimal = optimal == RequireOptimalSchedule::Yes;
        if let Some(cached) = &self.cached {
            if cached.dag == dag && !(need_optimal && !cached.optimal) {
                self.hits += 1;
                debug!(
                    "schedule cache hit ({} ops, {} hits, {} misses)",
                    dag.num_ops(),
                    self.hits,
                    self.misses
                );
                return Ok(cached.order.clone());
            }
        }

        self.misses += 1;
        debug!(
            "schedule cache miss ({} ops, optimal={need_optimal}, {} hits, {} misses)",
            dag.num_ops(),
            self.hits,
            self.misses
        );
        let order = compute_schedule(&dag, optimal, options)?;
        self.cached = Some(CachedSchedule {
            dag,
            order: order.clone(),
            optimal: need_optimal,
        });
        Ok(order)
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Whether the cached order, if any, came from the annealing phase.
    pub fn cached_is_optimal(&self) -> Option<bool> {
        self.cached.as_ref().map(|c| c.optimal)
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}
