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

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{liveness_lower_bound, liveness_profile, DependencyGraph, SchedulerOptions};

/// Probability of keeping a swap that leaves the objective unchanged.
const NEUTRAL_ACCEPTANCE: f64 = 0.25;

/// Wall-clock checks happen once per this many proposals.
const CLOCK_INTERVAL: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnealStats {
    pub proposals: u64,
    pub accepted: u64,
    /// `(peak, total)` liveness of the starting order.
    pub initial: (usize, usize),
    /// `(peak, total)` liveness of the returned order.
    pub best: (usize, usize),
    pub elapsed: Duration,
}

/// Improve a valid node order by swapping adjacent independent nodes.
///
/// The objective is peak liveness, then the sum of liveness over all
/// positions. A swap is legal when the two nodes share a bin, neither is a
/// barrier, and no edge joins them. Better orders are always kept, neutral
/// ones sometimes, and a lower-priority node only moves ahead of a
/// higher-priority one when the peak strictly drops. Stops at the time or
/// swap budget, after a long run without improvement, or at the lower bound.
pub fn anneal(
    dag: &DependencyGraph,
    order: Vec<usize>,
    options: &SchedulerOptions,
) -> (Vec<usize>, AnnealStats) {
    let start = Instant::now();
    let mut state = Liveness::new(dag, order);
    let initial = state.objective();
    let mut stats = AnnealStats {
        proposals: 0,
        accepted: 0,
        initial,
        best: initial,
        elapsed: Duration::ZERO,
    };
    let n = state.order.len();
    if n < 2 {
        return (state.order, stats);
    }

    let time_limit = Duration::try_from_secs_f64(options.time_limit_seconds.max(0.0))
        .unwrap_or(Duration::MAX);
    let stall_limit = (20 * n as u64).max(1000);
    let lower_bound = liveness_lower_bound(dag);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut best_order = state.order.clone();
    let mut stall = 0u64;

    while stats.proposals < options.swap_limit {
        if stats.proposals % CLOCK_INTERVAL == 0 && start.elapsed() >= time_limit {
            break;
        }
        if stats.best.0 <= lower_bound || stall >= stall_limit {
            break;
        }
        stats.proposals += 1;
        stall += 1;

        let i = rng.gen_range(0..n - 1);
        let (a, b) = (state.order[i], state.order[i + 1]);
        if dag.is_barrier(a)
            || dag.is_barrier(b)
            || dag.bin(a) != dag.bin(b)
            || dag.has_edge(a, b)
        {
            continue;
        }

        let before = state.objective();
        state.swap(i);
        let after = state.objective();

        let accept = if dag.priority(b) < dag.priority(a) {
            after.0 < before.0
        } else if after < before {
            true
        } else if after == before {
            rng.gen_bool(NEUTRAL_ACCEPTANCE)
        } else {
            false
        };
        if !accept {
            state.swap(i);
            continue;
        }

        stats.accepted += 1;
        if after < stats.best {
            stats.best = after;
            best_order.clone_from(&state.order);
            stall = 0;
        }
    }

    stats.elapsed = start.elapsed();
    (best_order, stats)
}

/// Liveness of an order, updated locally as adjacent nodes swap.
struct Liveness<'a> {
    dag: &'a DependencyGraph,
    order: Vec<usize>,
    position: Vec<usize>,
    profile: Vec<usize>,
    // multiset of profile values, for the peak
    levels: BTreeMap<usize, usize>,
    total: usize,
}

impl<'a> Liveness<'a> {
    fn new(dag: &'a DependencyGraph, order: Vec<usize>) -> Self {
        let mut position = vec![0; dag.num_nodes()];
        for (pos, &node) in order.iter().enumerate() {
            position[node] = pos;
        }
        let profile = liveness_profile(dag, &order);
        let mut levels = BTreeMap::new();
        for &live in &profile {
            *levels.entry(live).or_insert(0) += 1;
        }
        let total = profile.iter().sum();
        Self {
            dag,
            order,
            position,
            profile,
            levels,
            total,
        }
    }

    fn objective(&self) -> (usize, usize) {
        let peak = self.levels.keys().next_back().copied().unwrap_or(0);
        (peak, self.total)
    }

    /// Swap positions `i` and `i + 1`. Only those two positions of the
    /// profile can change.
    fn swap(&mut self, i: usize) {
        let (a, b) = (self.order[i], self.order[i + 1]);
        let mut touched: Vec<usize> = self
            .dag
            .allocs(a)
            .iter()
            .chain(self.dag.allocs(b))
            .copied()
            .collect();
        touched.sort_unstable();
        touched.dedup();

        let mut next = [self.profile[i], self.profile[i + 1]];
        for &alloc in &touched {
            let (lo, hi) = self.span(alloc);
            Self::apply(&mut next, i, lo, hi, self.dag.alloc_size(alloc), false);
        }

        self.order.swap(i, i + 1);
        self.position[a] = i + 1;
        self.position[b] = i;

        for &alloc in &touched {
            let (lo, hi) = self.span(alloc);
            Self::apply(&mut next, i, lo, hi, self.dag.alloc_size(alloc), true);
        }

        for (offset, value) in next.into_iter().enumerate() {
            self.set_level(i + offset, value);
        }
    }

    /// Add or remove `size` at the positions `i` and `i + 1` that lie within
    /// `[lo, hi]`.
    fn apply(next: &mut [usize; 2], i: usize, lo: usize, hi: usize, size: usize, add: bool) {
        for (offset, slot) in next.iter_mut().enumerate() {
            let pos = i + offset;
            if lo <= pos && pos <= hi {
                if add {
                    *slot += size;
                } else {
                    *slot -= size;
                }
            }
        }
    }

    fn span(&self, alloc: usize) -> (usize, usize) {
        let mut positions = self
            .dag
            .alloc_users(alloc)
            .iter()
            .map(|&n| self.position[n]);
        let first = positions.next().unwrap_or(0);
        positions.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)))
    }

    fn set_level(&mut self, pos: usize, value: usize) {
        let old = self.profile[pos];
        if old == value {
            return;
        }
        if let Some(count) = self.levels.get_mut(&old) {
            *count -= 1;
            if *count == 0 {
                self.levels.remove(&old);
            }
        }
        *self.levels.entry(value).or_insert(0) += 1;
        self.total = self.total - old + value;
        self.profile[pos] = value;
    }
}
