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

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{DependencyGraph, KahnTieBreaker, SchedulerError, SchedulerOptions};

/// Topological order of every node of `dag`.
///
/// Ready nodes are taken by descending priority; ties go to the configured
/// tie-breaker. With `use_closure`, greedy ties are further broken in favour
/// of the node with fewer descendants, so short branches finish (and release
/// their tensors) before long ones open.
pub fn kahn_order(
    dag: &DependencyGraph,
    options: &SchedulerOptions,
    use_closure: bool,
) -> Result<Vec<usize>, SchedulerError> {
    let descendants = if use_closure && dag.num_nodes() > 1 {
        let order = traverse(dag, KahnTieBreaker::Fifo, None, options.seed)?;
        Some(descendant_counts(dag, &order))
    } else {
        None
    };
    traverse(dag, options.kahn_tie_breaker, descendants.as_deref(), options.seed)
}

struct Ready {
    node: usize,
    seq: usize,
}

fn traverse(
    dag: &DependencyGraph,
    tie_breaker: KahnTieBreaker,
    descendants: Option<&[usize]>,
    seed: u64,
) -> Result<Vec<usize>, SchedulerError> {
    let n = dag.num_nodes();
    let mut in_degree: Vec<usize> = (0..n).map(|v| dag.predecessors(v).len()).collect();
    let mut remaining_users: Vec<usize> = (0..dag.num_allocs())
        .map(|a| dag.alloc_users(a).len())
        .collect();
    let mut started = vec![false; dag.num_allocs()];
    let mut rng = StdRng::seed_from_u64(seed);

    let mut seq = 0;
    let mut ready: Vec<Ready> = Vec::new();
    for node in 0..n {
        if in_degree[node] == 0 {
            ready.push(Ready { node, seq });
            seq += 1;
        }
    }

    let mut order = Vec::with_capacity(n);
    while !ready.is_empty() {
        let top = ready
            .iter()
            .map(|r| dag.priority(r.node))
            .max_by(f64::total_cmp)
            .unwrap_or(0.0);
        let candidates: Vec<usize> = (0..ready.len())
            .filter(|&i| dag.priority(ready[i].node).total_cmp(&top) == Ordering::Equal)
            .collect();

        let pick = match tie_breaker {
            KahnTieBreaker::Fifo => candidates.iter().copied().min_by_key(|&i| ready[i].seq),
            KahnTieBreaker::Random => Some(candidates[rng.gen_range(0..candidates.len())]),
            KahnTieBreaker::Greedy => candidates.iter().copied().min_by(|&i, &j| {
                let (a, b) = (ready[i].node, ready[j].node);
                let delta = |v| net_growth(dag, v, &started, &remaining_users);
                delta(a)
                    .cmp(&delta(b))
                    .then_with(|| match descendants {
                        Some(d) => d[a].cmp(&d[b]),
                        None => Ordering::Equal,
                    })
                    .then_with(|| ready[i].seq.cmp(&ready[j].seq))
            }),
        };
        let Some(pick) = pick else {
            return Err(SchedulerError::Internal("no ready node to pick".into()));
        };

        let node = ready.swap_remove(pick).node;
        order.push(node);
        for &alloc in dag.allocs(node) {
            started[alloc] = true;
            remaining_users[alloc] -= 1;
        }
        for &next in dag.successors(node) {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Ready { node: next, seq });
                seq += 1;
            }
        }
    }

    if order.len() < n {
        return Err(SchedulerError::Cycle {
            ops: find_cycle(dag, &in_degree),
        });
    }
    Ok(order)
}

/// Bytes that become live minus bytes released if `node` runs next.
fn net_growth(dag: &DependencyGraph, node: usize, started: &[bool], remaining: &[usize]) -> i64 {
    dag.allocs(node)
        .iter()
        .map(|&a| {
            let size = dag.alloc_size(a) as i64;
            let opens = if started[a] { 0 } else { size };
            let closes = if remaining[a] == 1 { size } else { 0 };
            opens - closes
        })
        .sum()
}

/// Number of transitive descendants of every node, from a valid order.
fn descendant_counts(dag: &DependencyGraph, order: &[usize]) -> Vec<usize> {
    let n = dag.num_nodes();
    let words = n.div_ceil(64);
    let mut reach = vec![vec![0u64; words]; n];
    for &node in order.iter().rev() {
        let mut bits = vec![0u64; words];
        for &succ in dag.successors(node) {
            bits[succ / 64] |= 1 << (succ % 64);
            for (w, word) in reach[succ].iter().enumerate() {
                bits[w] |= word;
            }
        }
        reach[node] = bits;
    }
    reach
        .iter()
        .map(|bits| bits.iter().map(|w| w.count_ones() as usize).sum())
        .collect()
}

/// Walk predecessors among the unscheduled nodes until one repeats. Every
/// unscheduled node has an unscheduled predecessor, so this finds a cycle.
fn find_cycle(dag: &DependencyGraph, in_degree: &[usize]) -> Vec<crate::ir::OpId> {
    let Some(start) = (0..dag.num_nodes()).find(|&v| in_degree[v] > 0) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut on_path = vec![None; dag.num_nodes()];
    on_path[start] = Some(0);
    let mut current = start;
    loop {
        let Some(&prev) = dag
            .predecessors(current)
            .iter()
            .find(|&&p| in_degree[p] > 0)
        else {
            return dag.ops_in(&path);
        };
        if let Some(pos) = on_path[prev] {
            let mut cycle = path[pos..].to_vec();
            cycle.reverse();
            return dag.ops_in(&cycle);
        }
        on_path[prev] = Some(path.len());
        path.push(prev);
        current = prev;
    }
}
