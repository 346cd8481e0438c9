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

use std::collections::BTreeSet;

use log::debug;

use crate::ir::{Graph, GraphError, OpId, TensorId, TensorKind};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PruneError {
    #[error("pruning would remove every op of the graph; check the declared outputs and anchors")]
    NothingRequired,
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub ops_removed: usize,
    pub tensors_removed: usize,
}

/// Remove every op and tensor not needed to produce the graph outputs or
/// `extra_targets`.
///
/// Non-pruneable ops, side-effect ops and ops that write a required tensor
/// in place are required as well. Variables always survive. Unknown target
/// ids are ignored.
pub fn prune(graph: &mut Graph, extra_targets: &[TensorId]) -> Result<PruneStats, PruneError> {
    let (required_ops, required_tensors) = required_set(graph, extra_targets);

    let doomed: Vec<OpId> = graph
        .op_ids()
        .into_iter()
        .filter(|op| !required_ops.contains(op))
        .collect();
    if graph.num_ops() > 0 && doomed.len() == graph.num_ops() {
        return Err(PruneError::NothingRequired);
    }

    for &op in &doomed {
        if let Some(o) = graph.op(op) {
            debug!("pruning op {}", o.debug_name());
        }
        graph.disconnect_all(op)?;
        graph.erase_op(op)?;
    }

    let dead: Vec<TensorId> = graph
        .tensors()
        .iter()
        .filter(|t| !required_tensors.contains(&t.id))
        .filter(|t| t.kind != TensorKind::Variable)
        .filter(|t| !t.has_producer() && t.consumers.is_empty())
        .map(|t| t.id.clone())
        .collect();
    for id in &dead {
        debug!("pruning tensor '{id}'");
        graph.remove_tensor(id)?;
    }

    let stats = PruneStats {
        ops_removed: doomed.len(),
        tensors_removed: dead.len(),
    };
    debug!(
        "pruned {} ops and {} tensors, {} ops remain",
        stats.ops_removed,
        stats.tensors_removed,
        graph.num_ops()
    );
    Ok(stats)
}

/// Backward reachability from the targets through producers. Ops that
/// modify a required tensor in place are pulled in with their inputs.
fn required_set(graph: &Graph, extra_targets: &[TensorId]) -> (BTreeSet<OpId>, BTreeSet<TensorId>) {
    let mut ops = BTreeSet::new();
    let mut tensors = BTreeSet::new();
    let mut frontier: Vec<TensorId> = Vec::new();

    let targets = graph.outputs().iter().chain(extra_targets.iter());
    for id in targets {
        if graph.tensor(id).is_some() {
            frontier.push(id.clone());
        } else {
            debug!("ignoring unknown prune target '{id}'");
        }
    }

    let mut pending_ops: Vec<OpId> = graph
        .ops()
        .filter(|op| !op.settings.pruneable || op.kind().has_side_effect())
        .map(|op| op.id())
        .collect();

    loop {
        for op in pending_ops.drain(..) {
            if !ops.insert(op) {
                continue;
            }
            if let Some(o) = graph.op(op) {
                frontier.extend(o.inputs().tensor_ids());
                frontier.extend(o.outputs().tensor_ids());
            }
        }
        let Some(id) = frontier.pop() else { break };
        if !tensors.insert(id.clone()) {
            continue;
        }
        let Some(tensor) = graph.tensor(&id) else {
            continue;
        };
        if let Some(producer) = tensor.producer {
            pending_ops.push(producer);
        }
        for consumer in tensor.consumers.ops() {
            let Some(op) = graph.op(consumer) else { continue };
            let modifies = op
                .inputs()
                .indices(&id)
                .into_iter()
                .any(|i| op.kind().modifies(i));
            if modifies {
                pending_ops.push(consumer);
            }
        }
    }
    (ops, tensors)
}
