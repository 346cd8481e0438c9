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

use super::DependencyGraph;

/// Live bytes at each position of a node order.
///
/// An allocation is live from the first to the last position of a node that
/// touches it, both inclusive.
pub fn liveness_profile(dag: &DependencyGraph, order: &[usize]) -> Vec<usize> {
    let mut position = vec![usize::MAX; dag.num_nodes()];
    for (pos, &node) in order.iter().enumerate() {
        position[node] = pos;
    }

    // Difference array over positions.
    let mut delta = vec![0i64; order.len() + 1];
    for alloc in 0..dag.num_allocs() {
        let positions = dag
            .alloc_users(alloc)
            .iter()
            .map(|&n| position[n])
            .filter(|&p| p != usize::MAX);
        let Some((first, last)) = positions.fold(None, |acc: Option<(usize, usize)>, p| {
            Some(acc.map_or((p, p), |(lo, hi)| (lo.min(p), hi.max(p))))
        }) else {
            continue;
        };
        let size = dag.alloc_size(alloc) as i64;
        delta[first] += size;
        delta[last + 1] -= size;
    }

    let mut live = 0i64;
    delta[..order.len()]
        .iter()
        .map(|d| {
            live += d;
            live as usize
        })
        .collect()
}

pub fn peak_liveness(profile: &[usize]) -> usize {
    profile.iter().copied().max().unwrap_or(0)
}

/// No order can peak below the bytes a single node touches at once.
pub fn liveness_lower_bound(dag: &DependencyGraph) -> usize {
    (0..dag.num_nodes())
        .map(|node| dag.allocs(node).iter().map(|&a| dag.alloc_size(a)).sum())
        .max()
        .unwrap_or(0)
}
