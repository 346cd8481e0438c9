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

//! Operators: identity, settings, and the capability interface every
//! operator type implements.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;

use crate::ir::{Graph, GraphError, TensorIndexMap};
use crate::types::TensorInfo;

/// Graph-unique op identifier. Ids are handed out by a per-graph counter and
/// never reused, so a smaller id always means an earlier creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
}

pub type Attributes = BTreeMap<String, AttrValue>;

/// Read a numeric attribute, accepting integers where floats are expected.
pub fn attr_f64(attrs: &Attributes, key: &str) -> Option<f64> {
    match attrs.get(key)? {
        AttrValue::Float(v) => Some(*v),
        AttrValue::Int(v) => Some(*v as f64),
        _ => None,
    }
}

/// Per-op settings the core interprets itself.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSettings {
    pub name: String,
    /// Higher priorities are scheduled earlier among otherwise free ops.
    pub schedule_priority: f64,
    pub execution_phase: Option<i64>,
    /// Ops that are not pruneable survive dead-code elimination.
    pub pruneable: bool,
}

impl Default for OpSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            schedule_priority: 0.0,
            execution_phase: None,
            pruneable: true,
        }
    }
}

impl OpSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Where a gradient op input comes from, relative to its forward op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GradInOutType {
    /// A forward input.
    In,
    /// A forward output.
    Out,
    /// The gradient of a forward output.
    GradOut,
}

/// Connects input `grad_in` of a gradient op to index `non_grad` of the
/// forward op, interpreted according to `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GradInOutMapper {
    pub grad_in: usize,
    pub non_grad: usize,
    pub kind: GradInOutType,
}

impl GradInOutMapper {
    pub fn new(grad_in: usize, non_grad: usize, kind: GradInOutType) -> Self {
        Self {
            grad_in,
            non_grad,
            kind,
        }
    }
}

/// A gradient op an operator asks the autodiff engine to grow.
#[derive(Debug)]
pub struct GradOpSpec {
    pub kind: Box<dyn OpKind>,
    pub inputs: Vec<GradInOutMapper>,
    /// Gradient output index -> forward input index it is the gradient of.
    pub out_to_in: BTreeMap<usize, usize>,
}

impl GradOpSpec {
    pub fn new(
        kind: Box<dyn OpKind>,
        inputs: Vec<GradInOutMapper>,
        out_to_in: impl IntoIterator<Item = (usize, usize)>,
    ) -> Self {
        Self {
            kind,
            inputs,
            out_to_in: out_to_in.into_iter().collect(),
        }
    }
}

/// Recorded on every op grown by the autodiff engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradOpInfo {
    pub forward: OpId,
    pub inputs: Vec<GradInOutMapper>,
    pub out_to_in: BTreeMap<usize, usize>,
}

/// The capability set of an operator type.
///
/// Only [`op_type`](OpKind::op_type) and [`infer`](OpKind::infer) are
/// mandatory; the remaining methods describe gradient, scheduling and
/// pruning behaviour and default to the common case.
pub trait OpKind: fmt::Debug {
    fn op_type(&self) -> &str;

    /// Compute output infos from the infos of the inputs wired so far.
    /// `inputs[i]` is `None` when index `i` is unwired.
    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError>;

    /// Describe the gradient ops for the forward op `op` of `graph`.
    fn grad_ops(&self, op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Err(GraphError::NotDifferentiable {
            op: op.debug_name(),
        })
    }

    /// Whether enough output gradients are available to build the gradient
    /// ops. `required` lists outputs that lie on a path to the loss.
    fn ready_to_create_gradients(
        &self,
        available: &BTreeSet<usize>,
        required: &BTreeSet<usize>,
    ) -> bool {
        required.is_subset(available)
    }

    /// Input indices that may stay unwired.
    fn optional_inputs(&self) -> BTreeSet<usize> {
        BTreeSet::new()
    }

    /// Whether the op writes input `in_index` in place.
    fn modifies(&self, _in_index: usize) -> bool {
        false
    }

    fn has_side_effect(&self) -> bool {
        false
    }

    fn is_loss(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct Op {
    pub(crate) id: OpId,
    pub(crate) kind: Box<dyn OpKind>,
    pub(crate) input: TensorIndexMap,
    pub(crate) output: TensorIndexMap,
    pub settings: OpSettings,
    pub(crate) grad: Option<GradOpInfo>,
    pub(crate) is_setup: bool,
}

impl Op {
    pub(crate) fn new(id: OpId, kind: Box<dyn OpKind>, settings: OpSettings) -> Self {
        Self {
            id,
            kind,
            input: TensorIndexMap::default(),
            output: TensorIndexMap::default(),
            settings,
            grad: None,
            is_setup: false,
        }
    }

    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn kind(&self) -> &dyn OpKind {
        self.kind.as_ref()
    }

    pub fn op_type(&self) -> &str {
        self.kind.op_type()
    }

    pub fn inputs(&self) -> &TensorIndexMap {
        &self.input
    }

    pub fn outputs(&self) -> &TensorIndexMap {
        &self.output
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    pub fn is_grad_op(&self) -> bool {
        self.grad.is_some()
    }

    pub fn grad_info(&self) -> Option<&GradOpInfo> {
        self.grad.as_ref()
    }

    /// The forward op this gradient op was grown from. Asking a forward op
    /// is a contract violation.
    pub fn non_grad_op(&self) -> Result<OpId, GraphError> {
        self.grad.as_ref().map(|g| g.forward).ok_or_else(|| {
            GraphError::Internal(format!(
                "{} is not a gradient op and has no forward partner",
                self.debug_name()
            ))
        })
    }

    /// `type(id)` or `type(id):name` when a name was given.
    pub fn debug_name(&self) -> String {
        if self.settings.name.is_empty() {
            format!("{}({})", self.op_type(), self.id)
        } else {
            format!("{}({}):{}", self.op_type(), self.id, self.settings.name)
        }
    }
}
