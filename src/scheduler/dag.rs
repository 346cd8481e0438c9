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

use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{Graph, OpId, TensorKind};

use super::{OpsBeforeKey, SchedulerError, SchedulerOptions};

/// The scheduler's view of a graph.
///
/// Nodes `0..num_ops()` are the graph's ops in id order. When execution
/// phases are respected, one barrier node follows each bin but the last;
/// every op of bin `k` precedes barrier `k`, which precedes every op of bin
/// `k + 1`. Allocations are the non-variable tensors, weighted by their byte
/// size and attached to every op that reads or writes them, except inputs an
/// op overwrites in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyGraph {
    ops: Vec<OpId>,
    barriers: usize,
    alloc_sizes: Vec<usize>,
    alloc_users: Vec<Vec<usize>>,
    node_allocs: Vec<Vec<usize>>,
    edges: BTreeSet<(usize, usize)>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    priorities: Vec<f64>,
    bins: Vec<usize>,
}

impl DependencyGraph {
    pub fn build(
        graph: &Graph,
        extra: &OpsBeforeKey,
        options: &SchedulerOptions,
    ) -> Result<Self, SchedulerError> {
        let ops = graph.op_ids();
        let node_of: BTreeMap<OpId, usize> =
            ops.iter().enumerate().map(|(i, op)| (*op, i)).collect();

        let mut alloc_of: BTreeMap<&str, usize> = BTreeMap::new();
        let mut alloc_sizes = Vec::new();
        let mut node_allocs = vec![Vec::new(); ops.len()];
        let mut edges = BTreeSet::new();
        let mut priorities = Vec::with_capacity(ops.len());

        for (node, op) in graph.ops().enumerate() {
            priorities.push(op.settings.schedule_priority);

            let inputs = op
                .inputs()
                .iter()
                .filter(|(index, _)| !op.kind().modifies(*index));
            let outputs = op.outputs().iter();
            for (_, id) in inputs.chain(outputs) {
                let Some(tensor) = graph.tensor(id) else {
                    return Err(SchedulerError::Internal(format!(
                        "op {} refers to unknown tensor '{id}'",
                        op.id()
                    )));
                };
                if tensor.kind == TensorKind::Variable {
                    continue;
                }
                let alloc = *alloc_of.entry(id.as_str()).or_insert_with(|| {
                    alloc_sizes.push(tensor.nbytes());
                    alloc_sizes.len() - 1
                });
                if !node_allocs[node].contains(&alloc) {
                    node_allocs[node].push(alloc);
                }
            }

            for (_, id) in op.outputs().iter() {
                if let Some(tensor) = graph.tensor(id) {
                    for consumer in tensor.consumers.ops() {
                        if let Some(&to) = node_of.get(&consumer) {
                            if to != node {
                                edges.insert((node, to));
                            }
                        }
                    }
                }
            }
        }

        for (before, after) in graph.topo_cons().edges() {
            if let (Some(&b), Some(&a)) = (node_of.get(&before), node_of.get(&after)) {
                edges.insert((b, a));
            }
        }

        for (after, befores) in extra {
            let a = *node_of.get(after).ok_or(SchedulerError::UnknownOp(*after))?;
            for before in befores {
                let b = *node_of.get(before).ok_or(SchedulerError::UnknownOp(*before))?;
                if a != b {
                    edges.insert((b, a));
                }
            }
        }

        let mut bins = vec![0; ops.len()];
        let mut barriers = 0;
        if options.execution_phases > 1 {
            for (node, op) in graph.ops().enumerate() {
                let phase = op.settings.execution_phase.unwrap_or(-1);
                if phase < -1 {
                    return Err(SchedulerError::InvalidExecutionPhase {
                        op: op.id(),
                        phase,
                    });
                }
                bins[node] = (phase + 1) as usize;
            }
            barriers = bins.iter().copied().max().unwrap_or(0);
            let n = ops.len();
            for (node, &bin) in bins.iter().enumerate() {
                if bin < barriers {
                    edges.insert((node, n + bin));
                }
                if bin > 0 {
                    edges.insert((n + bin - 1, node));
                }
            }
            for k in 1..barriers {
                edges.insert((n + k - 1, n + k));
            }
            bins.extend(0..barriers);
        }

        let total = ops.len() + barriers;
        let mut successors = vec![Vec::new(); total];
        let mut predecessors = vec![Vec::new(); total];
        for &(from, to) in &edges {
            successors[from].push(to);
            predecessors[to].push(from);
        }
        node_allocs.resize(total, Vec::new());
        priorities.resize(total, 0.0);

        let mut alloc_users = vec![Vec::new(); alloc_sizes.len()];
        for (node, allocs) in node_allocs.iter().enumerate() {
            for &alloc in allocs {
                alloc_users[alloc].push(node);
            }
        }

        Ok(Self {
            ops,
            barriers,
            alloc_sizes,
            alloc_users,
            node_allocs,
            edges,
            successors,
            predecessors,
            priorities,
            bins,
        })
    }

    /// Ops plus barrier nodes.
    pub fn num_nodes(&self) -> usize {
        self.ops.len() + self.barriers
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The op behind `node`, or `None` for a barrier.
    pub fn op(&self, node: usize) -> Option<OpId> {
        self.ops.get(node).copied()
    }

    pub fn node_of(&self, op: OpId) -> Option<usize> {
        self.ops.binary_search(&op).ok()
    }

    pub fn is_barrier(&self, node: usize) -> bool {
        node >= self.ops.len()
    }

    pub fn successors(&self, node: usize) -> &[usize] {
        &self.successors[node]
    }

    pub fn predecessors(&self, node: usize) -> &[usize] {
        &self.predecessors[node]
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges.iter().copied()
    }

    pub fn priority(&self, node: usize) -> f64 {
        self.priorities[node]
    }

    pub fn bin(&self, node: usize) -> usize {
        self.bins[node]
    }

    pub fn allocs(&self, node: usize) -> &[usize] {
        &self.node_allocs[node]
    }

    pub fn num_allocs(&self) -> usize {
        self.alloc_sizes.len()
    }

    pub fn alloc_size(&self, alloc: usize) -> usize {
        self.alloc_sizes[alloc]
    }

    /// Nodes touching `alloc`.
    pub fn alloc_users(&self, alloc: usize) -> &[usize] {
        &self.alloc_users[alloc]
    }

    /// Translate a node order into ops, dropping barriers.
    pub fn ops_in(&self, order: &[usize]) -> Vec<OpId> {
        order.iter().filter_map(|&node| self.op(node)).collect()
    }

    /// Translate an op schedule back into nodes, placing barriers where
    /// their bins end. Fails on unknown or repeated ops.
    pub fn nodes_of(&self, schedule: &[OpId]) -> Result<Vec<usize>, SchedulerError> {
        let mut seen = BTreeSet::new();
        let mut nodes = Vec::with_capacity(self.num_nodes());
        let mut next_barrier = 0;
        for op in schedule {
            let node = self.node_of(*op).ok_or(SchedulerError::UnknownOp(*op))?;
            if !seen.insert(node) {
                return Err(SchedulerError::Internal(format!(
                    "op {op} appears twice in the schedule"
                )));
            }
            while next_barrier < self.barriers && self.bins[node] > next_barrier {
                nodes.push(self.ops.len() + next_barrier);
                next_barrier += 1;
            }
            nodes.push(node);
        }
        nodes.extend((next_barrier..self.barriers).map(|k| self.ops.len() + k));
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::OpSettings;
    use crate::ops::{Add, Relu};
    use crate::types::{DType, TensorData, TensorInfo};

    fn diamond() -> Graph {
        let mut g = Graph::default();
        let info = TensorInfo::new(DType::F32, vec![4]);
        g.add_input("x", info.clone()).expect("x");
        g.add_var_init("w", info, TensorData::from_f32s(&[0.0; 4]))
            .expect("w");
        let a = g.create_op(Box::new(Relu), OpSettings::default());
        g.connect_in_tensor(a, 0, "x").expect("a in");
        g.create_and_connect_out_tensor(a, 0, "a").expect("a out");
        let b = g.create_op(Box::new(Add), OpSettings::default());
        g.connect_in_tensor(b, 0, "a").expect("b in");
        g.connect_in_tensor(b, 1, "w").expect("b in");
        g.create_and_connect_out_tensor(b, 0, "b").expect("b out");
        g
    }

    #[test]
    fn variables_are_not_allocations() {
        let g = diamond();
        let dag = DependencyGraph::build(&g, &OpsBeforeKey::new(), &SchedulerOptions::default())
            .expect("dag");
        assert_eq!(dag.num_allocs(), 3);
        assert!(dag.has_edge(0, 1));
        assert_eq!(dag.alloc_size(0), 16);
    }

    #[test]
    fn phases_add_barriers() {
        let mut g = diamond();
        g.op_mut(OpId(0)).expect("op").settings.execution_phase = Some(0);
        g.op_mut(OpId(1)).expect("op").settings.execution_phase = Some(1);
        let options = SchedulerOptions {
            execution_phases: 2,
            ..SchedulerOptions::default()
        };
        let dag = DependencyGraph::build(&g, &OpsBeforeKey::new(), &options).expect("dag");
        // bins 1 and 2, so barriers after bin 0 and bin 1
        assert_eq!(dag.num_nodes(), 4);
        assert!(dag.has_edge(0, 3));
        assert!(dag.has_edge(3, 1));
        assert_eq!(dag.nodes_of(&[OpId(0), OpId(1)]).expect("nodes"), vec![2, 0, 3, 1]);
    }

    #[test]
    fn phase_below_minus_one_is_rejected() {
        let mut g = diamond();
        g.op_mut(OpId(0)).expect("op").settings.execution_phase = Some(-2);
        let options = SchedulerOptions {
            execution_phases: 2,
            ..SchedulerOptions::default()
        };
        assert_eq!(
            DependencyGraph::build(&g, &OpsBeforeKey::new(), &options),
            Err(SchedulerError::InvalidExecutionPhase {
                op: OpId(0),
                phase: -2
            })
        );
    }
}
