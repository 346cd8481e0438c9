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
use std::fmt;

use log::{debug, info, warn};

use crate::ir::{
    GradInOutType, GradOpInfo, GradOpSpec, Graph, GraphError, OpId, OpSettings, TensorId,
    TensorKind,
};
use crate::names::{edge_grad_id, grad_id, is_reserved_id};
use crate::ops::Sum;
use crate::types::{TensorData, TensorInfo};

use super::registry::{OpGradRegistry, TensorGradRegistry};

/// Inputs of a differentiation run.
#[derive(Debug, Clone, Default)]
pub struct GradientOptions {
    /// Scalar tensor to differentiate.
    pub loss: TensorId,
    /// Variables that must not receive a gradient.
    pub do_not_update: BTreeSet<TensorId>,
    /// Stream tensors that request a gradient.
    pub stream_gradients: BTreeSet<TensorId>,
    /// Forward phase count. With more than one phase, the gradient ops of a
    /// phase-`p` op run in phase `2 * phases - 1 - p`.
    pub execution_phases: usize,
}

impl GradientOptions {
    pub fn new(loss: impl Into<TensorId>) -> Self {
        Self {
            loss: loss.into(),
            ..Self::default()
        }
    }
}

/// Result of a differentiation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradientResult {
    /// Gradients keyed by the variable or stream they differentiate.
    pub gradients: BTreeMap<TensorId, TensorId>,
    /// Every op grown, in growth order.
    pub grad_ops: Vec<OpId>,
    /// Variables (and requested streams) the loss does not reach.
    pub missing: Vec<TensorId>,
}

/// Errors returned by the autodiff engine.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AutodiffError {
    /// A user tensor already uses the name pattern of generated gradients.
    #[error("tensor '{0}' collides with the reserved gradient naming pattern")]
    ReservedId(TensorId),
    #[error("loss tensor '{0}' not found")]
    UnknownLoss(TensorId),
    #[error("loss tensor '{loss}' must hold one element, got {info}")]
    LossNotScalar { loss: TensorId, info: TensorInfo },
    #[error("loss tensor '{0}' is not computed by any op")]
    LossWithoutProducer(TensorId),
    /// Recursion guard: gradient ops have no gradients of their own.
    #[error("cannot build gradients of gradient op {op}")]
    GradOfGradOp { op: String },
    /// An operator described gradient ops that do not fit its wiring.
    #[error("invalid gradient op for {op}: {message}")]
    InvalidGradOp { op: String, message: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("internal autodiff error: {0}")]
    Internal(String),
}

impl AutodiffError {
    pub fn is_internal(&self) -> bool {
        match self {
            AutodiffError::Internal(_) => true,
            AutodiffError::Graph(err) => err.is_internal(),
            _ => false,
        }
    }
}

/// Grow the backward graph of `options.loss` into `graph`.
///
/// The traversal is data driven: gradients flow from the seed through the
/// op and tensor registries, and each completion grows either the gradient
/// ops of a forward op or the single sum that combines a tensor's partial
/// gradients. Only ops with a data path to the loss take part.
pub fn differentiate(
    graph: &mut Graph,
    options: &GradientOptions,
) -> Result<GradientResult, AutodiffError> {
    if let Some(id) = graph.tensors().ids().find(|id| is_reserved_id(id)) {
        return Err(AutodiffError::ReservedId(id.clone()));
    }

    let loss = options.loss.as_str();
    let loss_tensor = graph
        .tensor(loss)
        .ok_or_else(|| AutodiffError::UnknownLoss(loss.to_string()))?;
    let loss_info = loss_tensor
        .info
        .clone()
        .ok_or_else(|| AutodiffError::Internal(format!("loss '{loss}' has no shape")))?;
    if loss_info.nelms() != 1 {
        return Err(AutodiffError::LossNotScalar {
            loss: loss.to_string(),
            info: loss_info,
        });
    }
    let loss_producer = loss_tensor
        .producer
        .ok_or_else(|| AutodiffError::LossWithoutProducer(loss.to_string()))?;

    info!(
        "differentiating '{loss}' over {} ops, {} variables",
        graph.num_ops(),
        graph.tensors_of_kind(TensorKind::Variable).len()
    );

    let mut builder = GradientBuilder::new(graph, options, loss_producer)?;
    builder.seed(&loss_info)?;
    builder.propagate()?;
    Ok(builder.finish())
}

struct GradientBuilder<'a> {
    graph: &'a mut Graph,
    options: &'a GradientOptions,
    to_loss: BTreeSet<OpId>,
    tensors: TensorGradRegistry,
    ops: OpGradRegistry,
    /// Forward tensor -> its complete gradient.
    grad_of: BTreeMap<TensorId, TensorId>,
    result: GradientResult,
}

impl<'a> GradientBuilder<'a> {
    fn new(
        graph: &'a mut Graph,
        options: &'a GradientOptions,
        loss_producer: OpId,
    ) -> Result<Self, AutodiffError> {
        let to_loss = ops_on_path_to(graph, loss_producer);

        let mut tensors = TensorGradRegistry::default();
        let mut ops = OpGradRegistry::default();
        let mut consumed: BTreeMap<TensorId, usize> = BTreeMap::new();
        for &id in &to_loss {
            let op = graph.require_op(id)?;
            for (_, tensor) in op.inputs().iter() {
                *consumed.entry(tensor.clone()).or_insert(0) += 1;
            }
        }
        for (tensor, edges) in &consumed {
            tensors.set_expected(tensor, *edges);
        }
        for &id in &to_loss {
            let op = graph.require_op(id)?;
            let required = op
                .outputs()
                .iter()
                .filter(|(_, t)| consumed.contains_key(*t) || *t == &options.loss)
                .map(|(i, _)| i)
                .collect();
            ops.set_required(id, required);
        }
        debug!(
            "{} ops and {} tensors lie on a path to the loss",
            to_loss.len(),
            consumed.len()
        );

        Ok(Self {
            graph,
            options,
            to_loss,
            tensors,
            ops,
            grad_of: BTreeMap::new(),
            result: GradientResult::default(),
        })
    }

    /// A constant one is the gradient of the loss with respect to itself.
    fn seed(&mut self, loss_info: &TensorInfo) -> Result<(), AutodiffError> {
        let loss = self.options.loss.clone();
        let seed = grad_id(&loss);
        self.graph.add_initialised(
            &seed,
            TensorKind::Constant,
            loss_info.clone(),
            TensorData::one(loss_info.dtype),
        )?;
        self.grad_of.insert(loss.clone(), seed);
        self.register_with_producer(&loss)
    }

    fn propagate(&mut self) -> Result<(), AutodiffError> {
        loop {
            let ops = self.ops.pop_complete();
            let tensors = self.tensors.pop_complete();
            if ops.is_empty() && tensors.is_empty() {
                break;
            }
            for op in ops {
                self.grow_grad_ops(op)?;
            }
            for (tensor, partials) in tensors {
                self.grow_grad_sum(&tensor, partials)?;
            }
        }

        let outstanding = self.tensors.outstanding();
        if !outstanding.is_empty() {
            debug!("gradients never completed for {outstanding:?}");
        }
        Ok(())
    }

    fn grow_grad_ops(&mut self, forward: OpId) -> Result<(), AutodiffError> {
        let (specs, name, phase) = {
            let op = self.graph.require_op(forward)?;
            if op.is_grad_op() {
                return Err(AutodiffError::GradOfGradOp {
                    op: op.debug_name(),
                });
            }
            let specs = op.kind().grad_ops(op, self.graph)?;
            (specs, op.debug_name(), op.settings.execution_phase)
        };
        validate_specs(self.graph, forward, &name, &specs)?;

        let mut covered = BTreeSet::new();
        for spec in specs {
            covered.extend(spec.out_to_in.values().copied());
            self.grow_one(forward, &name, spec, phase)?;
        }

        let uncovered: Vec<TensorId> = self
            .graph
            .require_op(forward)?
            .inputs()
            .iter()
            .filter(|(i, _)| !covered.contains(i))
            .map(|(_, t)| t.clone())
            .collect();
        for tensor in uncovered {
            self.tensors.decrement_expected(&tensor)?;
        }
        Ok(())
    }

    fn grow_one(
        &mut self,
        forward: OpId,
        name: &str,
        spec: GradOpSpec,
        phase: Option<i64>,
    ) -> Result<(), AutodiffError> {
        let mut wiring = Vec::with_capacity(spec.inputs.len());
        let mut outputs = Vec::with_capacity(spec.out_to_in.len());
        {
            let op = self.graph.require_op(forward)?;
            for mapper in &spec.inputs {
                let source = match mapper.kind {
                    GradInOutType::In => op.inputs().id(mapper.non_grad).cloned(),
                    GradInOutType::Out => op.outputs().id(mapper.non_grad).cloned(),
                    GradInOutType::GradOut => op
                        .outputs()
                        .id(mapper.non_grad)
                        .and_then(|t| self.grad_of.get(t))
                        .cloned(),
                };
                let source = source.ok_or_else(|| AutodiffError::InvalidGradOp {
                    op: name.to_string(),
                    message: format!(
                        "{:?} index {} needed by {} is not available",
                        mapper.kind,
                        mapper.non_grad,
                        spec.kind.op_type()
                    ),
                })?;
                wiring.push((mapper.grad_in, source));
            }
            for (&grad_out, &fwd_in) in &spec.out_to_in {
                let tensor = op.inputs().id(fwd_in).cloned().ok_or_else(|| {
                    AutodiffError::Internal(format!("input {fwd_in} of {name} vanished"))
                })?;
                outputs.push((grad_out, fwd_in, tensor));
            }
        }

        let settings = OpSettings {
            execution_phase: self.backward_phase(phase),
            ..OpSettings::default()
        };
        let grad_op = self.graph.create_op(spec.kind, settings);
        for (index, tensor) in &wiring {
            self.graph.connect_in_tensor(grad_op, *index, tensor)?;
        }
        for (grad_out, fwd_in, tensor) in &outputs {
            let id = edge_grad_id(tensor, forward, *fwd_in);
            self.graph
                .create_and_connect_out_tensor(grad_op, *grad_out, &id)?;
        }
        self.graph.require_op_mut(grad_op)?.grad = Some(GradOpInfo {
            forward,
            inputs: spec.inputs,
            out_to_in: spec.out_to_in,
        });
        self.graph.setup_op(grad_op)?;
        self.result.grad_ops.push(grad_op);

        for (grad_out, _, tensor) in outputs {
            let expected = self.graph.tensor_info(&tensor)?.clone();
            let grad = self
                .graph
                .require_op(grad_op)?
                .outputs()
                .id(grad_out)
                .cloned()
                .ok_or_else(|| AutodiffError::Internal("gradient output vanished".into()))?;
            let found = self.graph.tensor_info(&grad)?;
            if *found != expected {
                return Err(AutodiffError::InvalidGradOp {
                    op: name.to_string(),
                    message: format!("gradient '{grad}' is {found}, '{tensor}' is {expected}"),
                });
            }
            self.tensors.insert(&tensor, grad)?;
        }
        Ok(())
    }

    /// Combine the partial gradients of `tensor` into `grad_id(tensor)`.
    fn grow_grad_sum(&mut self, tensor: &str, mut partials: Vec<TensorId>) -> Result<(), AutodiffError> {
        let kind = self.graph.require_tensor(tensor)?.kind;
        let wanted = match kind {
            TensorKind::Constant => false,
            TensorKind::Stream => self.options.stream_gradients.contains(tensor),
            TensorKind::Variable => !self.options.do_not_update.contains(tensor),
            TensorKind::Computed => true,
        };
        if partials.is_empty() {
            return self.abandon_producer(tensor);
        }
        if !wanted {
            return Ok(());
        }

        partials.sort();
        let phase = partials
            .iter()
            .filter_map(|p| self.graph.tensor(p).and_then(|t| t.producer))
            .filter_map(|op| self.graph.op(op).and_then(|o| o.settings.execution_phase))
            .max();
        let sum = self.graph.create_op(
            Box::new(Sum),
            OpSettings {
                execution_phase: phase,
                ..OpSettings::named(format!("GradSum:{tensor}"))
            },
        );
        for (index, partial) in partials.iter().enumerate() {
            self.graph.connect_in_tensor(sum, index, partial)?;
        }
        let total = grad_id(tensor);
        self.graph.create_and_connect_out_tensor(sum, 0, &total)?;
        self.graph.setup_op(sum)?;
        self.result.grad_ops.push(sum);
        debug!("summed {} partial gradients into '{total}'", partials.len());

        self.grad_of.insert(tensor.to_string(), total.clone());
        match kind {
            TensorKind::Variable | TensorKind::Stream => {
                self.result.gradients.insert(tensor.to_string(), total);
                Ok(())
            }
            _ => self.register_with_producer(tensor),
        }
    }

    /// Tell the producer of `tensor` that this output's gradient is ready.
    fn register_with_producer(&mut self, tensor: &str) -> Result<(), AutodiffError> {
        let Some(producer) = self.graph.require_tensor(tensor)?.producer else {
            return Ok(());
        };
        if !self.to_loss.contains(&producer) {
            return Ok(());
        }
        let op = self.graph.require_op(producer)?;
        for index in op.outputs().indices(tensor) {
            self.ops.insert(op, index)?;
        }
        Ok(())
    }

    /// `tensor` completed without any gradient. When no output of its
    /// producer can deliver one, the producer's input edges are dropped too.
    fn abandon_producer(&mut self, tensor: &str) -> Result<(), AutodiffError> {
        let Some(producer) = self.graph.require_tensor(tensor)?.producer else {
            return Ok(());
        };
        if !self.to_loss.contains(&producer) {
            return Ok(());
        }
        let op = self.graph.require_op(producer)?;
        let mut retired = false;
        for index in op.outputs().indices(tensor) {
            retired |= self.ops.drop_output(op, index);
        }
        if !retired {
            return Ok(());
        }
        debug!("{} delivers no gradients", op.debug_name());
        let inputs: Vec<TensorId> = op.inputs().iter().map(|(_, t)| t.clone()).collect();
        for input in inputs {
            self.tensors.decrement_expected(&input)?;
        }
        Ok(())
    }

    fn backward_phase(&self, forward: Option<i64>) -> Option<i64> {
        let phases = self.options.execution_phases as i64;
        match forward {
            Some(p) if phases > 1 => Some(2 * phases - 1 - p),
            other => other,
        }
    }

    fn finish(mut self) -> GradientResult {
        for var in self.graph.tensors_of_kind(TensorKind::Variable) {
            if self.options.do_not_update.contains(&var) || self.result.gradients.contains_key(&var)
            {
                continue;
            }
            warn!("variable '{var}' has no path to the loss and receives no gradient");
            self.result.missing.push(var);
        }
        for stream in &self.options.stream_gradients {
            if !self.result.gradients.contains_key(stream) {
                warn!("stream '{stream}' requested a gradient but has no path to the loss");
                self.result.missing.push(stream.clone());
            }
        }
        info!(
            "grew {} gradient ops, {} gradients, {} missing",
            self.result.grad_ops.len(),
            self.result.gradients.len(),
            self.result.missing.len()
        );
        self.result
    }
}

/// Ops with a data path to `target`, `target` included.
fn ops_on_path_to(graph: &Graph, target: OpId) -> BTreeSet<OpId> {
    let mut seen = BTreeSet::from([target]);
    let mut stack = vec![target];
    while let Some(id) = stack.pop() {
        let Some(op) = graph.op(id) else { continue };
        for (_, tensor) in op.inputs().iter() {
            if let Some(producer) = graph.tensor(tensor).and_then(|t| t.producer) {
                if seen.insert(producer) {
                    stack.push(producer);
                }
            }
        }
    }
    seen
}

/// Each gradient output must map to a distinct, wired forward input.
fn validate_specs(
    graph: &Graph,
    forward: OpId,
    name: &str,
    specs: &[GradOpSpec],
) -> Result<(), AutodiffError> {
    let op = graph.require_op(forward)?;
    let invalid = |message: String| AutodiffError::InvalidGradOp {
        op: name.to_string(),
        message,
    };
    let mut covered = BTreeSet::new();
    for spec in specs {
        for (&grad_out, &fwd_in) in &spec.out_to_in {
            if !op.inputs().has_index(fwd_in) {
                return Err(invalid(format!(
                    "output {grad_out} of {} maps to unwired input {fwd_in}",
                    spec.kind.op_type()
                )));
            }
            if !covered.insert(fwd_in) {
                return Err(invalid(format!(
                    "input {fwd_in} receives more than one gradient"
                )));
            }
        }
        let mut grad_ins = BTreeSet::new();
        if let Some(m) = spec.inputs.iter().find(|m| !grad_ins.insert(m.grad_in)) {
            return Err(invalid(format!(
                "{} wires input {} twice",
                spec.kind.op_type(),
                m.grad_in
            )));
        }
    }
    Ok(())
}

impl fmt::Display for GradientResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Gradients:")?;
        for (src, grad) in &self.gradients {
            writeln!(f, "  {src} -> {grad}")?;
        }
        if !self.missing.is_empty() {
            writeln!(f, "Missing: {}", self.missing.join(", "))?;
        }
        write!(f, "Grew {} ops", self.grad_ops.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::OpKind;
    use crate::ops::{Identity, L1};
    use crate::types::DType;

    fn grow(g: &mut Graph, kind: Box<dyn OpKind>, inputs: &[&str], output: &str) -> OpId {
        let op = g.create_op(kind, OpSettings::default());
        for (i, t) in inputs.iter().enumerate() {
            g.connect_in_tensor(op, i, t).expect("connect input");
        }
        g.create_and_connect_out_tensor(op, 0, output).expect("connect output");
        g.setup_op(op).expect("setup");
        op
    }

    fn var(g: &mut Graph, id: &str) {
        let info = TensorInfo::new(DType::F32, vec![2]);
        g.add_var_init(id, info, TensorData::from_f32s(&[1.0, 2.0]))
            .expect("variable");
    }

    #[test]
    fn gradient_ops_are_never_differentiated() {
        let mut g = Graph::default();
        var(&mut g, "w");
        let copy = grow(&mut g, Box::new(Identity), &["w"], "y");
        grow(&mut g, Box::new(L1 { lambda: 1.0 }), &["y"], "loss");
        g.require_op_mut(copy).expect("op").grad = Some(GradOpInfo {
            forward: copy,
            inputs: Vec::new(),
            out_to_in: BTreeMap::new(),
        });

        let err = differentiate(&mut g, &GradientOptions::new("loss")).unwrap_err();
        assert!(matches!(err, AutodiffError::GradOfGradOp { .. }));
    }

    #[test]
    fn mirrored_phases_for_backward_ops() {
        let mut g = Graph::default();
        var(&mut g, "w");
        let copy = grow(&mut g, Box::new(Identity), &["w"], "y");
        let loss = grow(&mut g, Box::new(L1 { lambda: 1.0 }), &["y"], "loss");
        g.require_op_mut(copy).expect("op").settings.execution_phase = Some(0);
        g.require_op_mut(loss).expect("op").settings.execution_phase = Some(1);

        let options = GradientOptions {
            execution_phases: 2,
            ..GradientOptions::new("loss")
        };
        let result = differentiate(&mut g, &options).expect("gradients");
        let phases: Vec<(String, Option<i64>)> = result
            .grad_ops
            .iter()
            .map(|id| {
                let op = g.op(*id).expect("grad op");
                (op.op_type().to_string(), op.settings.execution_phase)
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                ("L1Grad".to_string(), Some(2)),
                ("Sum".to_string(), Some(2)),
                ("IdentityGrad".to_string(), Some(3)),
                ("Sum".to_string(), Some(3)),
            ]
        );
    }
}
