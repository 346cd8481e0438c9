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

use crate::ir::{Graph, OpId, TensorId, TensorKind};

/// Structured errors returned by the graph verifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IrVerifyError {
    /// An op refers to a tensor the graph does not own.
    #[error("op {op} refers to unknown tensor '{tensor}'")]
    DanglingTensor { op: OpId, tensor: TensorId },
    /// An op input has no matching consumer entry on the tensor, or the
    /// counts disagree.
    #[error("tensor '{tensor}' lists op {op} as consumer {found} times, op wires it {expected} times")]
    ConsumerMismatch {
        op: OpId,
        tensor: TensorId,
        expected: usize,
        found: usize,
    },
    /// An op output does not name that op as its producer.
    #[error("tensor '{tensor}' is an output of op {op} but names producer {producer:?}")]
    ProducerMismatch {
        op: OpId,
        tensor: TensorId,
        producer: Option<OpId>,
    },
    /// A tensor back-reference points at an op that does not exist or does
    /// not wire the tensor.
    #[error("tensor '{tensor}' refers back to op {op}, which does not wire it")]
    StaleBackReference { tensor: TensorId, op: OpId },
    /// A computed tensor that is not a declared input has no producer.
    #[error("computed tensor '{0}' has no producer")]
    MissingProducer(TensorId),
    /// An ordering constraint mentions an op that no longer exists.
    #[error("ordering constraint refers to unknown op {0}")]
    DanglingConstraint(OpId),
    /// A declared input or output is not a tensor of the graph.
    #[error("declared graph input/output '{0}' does not exist")]
    UnknownBoundary(TensorId),
}

/// Verify that the wiring of a [`Graph`] is bidirectionally consistent.
///
/// Checks run from both sides: every op's wiring must be mirrored by the
/// tensors' producer and consumer back-references, and every back-reference
/// must be mirrored by the op. Returns the first violation found.
pub fn verify_graph(graph: &Graph) -> Result<(), IrVerifyError> {
    for op in graph.ops() {
        for (_, id) in op.inputs().iter() {
            let tensor = graph
                .tensor(id)
                .ok_or_else(|| IrVerifyError::DanglingTensor {
                    op: op.id(),
                    tensor: id.clone(),
                })?;
            let expected = op.inputs().indices(id).len();
            let found = tensor.consumers.count(op.id());
            if expected != found {
                return Err(IrVerifyError::ConsumerMismatch {
                    op: op.id(),
                    tensor: id.clone(),
                    expected,
                    found,
                });
            }
        }
        for (_, id) in op.outputs().iter() {
            let tensor = graph
                .tensor(id)
                .ok_or_else(|| IrVerifyError::DanglingTensor {
                    op: op.id(),
                    tensor: id.clone(),
                })?;
            if tensor.producer != Some(op.id()) {
                return Err(IrVerifyError::ProducerMismatch {
                    op: op.id(),
                    tensor: id.clone(),
                    producer: tensor.producer,
                });
            }
        }
    }

    let declared_inputs: BTreeSet<&TensorId> = graph.inputs().iter().collect();
    for tensor in graph.tensors().iter() {
        if let Some(producer) = tensor.producer {
            let wires = graph
                .op(producer)
                .map_or(false, |op| op.outputs().contains(&tensor.id));
            if !wires {
                return Err(IrVerifyError::StaleBackReference {
                    tensor: tensor.id.clone(),
                    op: producer,
                });
            }
        } else if tensor.kind == TensorKind::Computed && !declared_inputs.contains(&tensor.id) {
            return Err(IrVerifyError::MissingProducer(tensor.id.clone()));
        }

        for consumer in tensor.consumers.ops() {
            let wires = graph
                .op(consumer)
                .map_or(false, |op| op.inputs().contains(&tensor.id));
            if !wires {
                return Err(IrVerifyError::StaleBackReference {
                    tensor: tensor.id.clone(),
                    op: consumer,
                });
            }
        }
    }

    for (before, after) in graph.topo_cons().edges() {
        for op in [before, after] {
            if graph.op(op).is_none() {
                return Err(IrVerifyError::DanglingConstraint(op));
            }
        }
    }

    for id in graph.inputs().iter().chain(graph.outputs()) {
        if graph.tensor(id).is_none() {
            return Err(IrVerifyError::UnknownBoundary(id.clone()));
        }
    }

    Ok(())
}
