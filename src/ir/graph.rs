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

//! The mutable dataflow graph.
//!
//! A [`Graph`] owns its ops and tensors outright; everything else refers to
//! them by [`OpId`] or tensor id. Every mutating call leaves the op wiring
//! tables and the tensors' producer/consumer back-references in agreement
//! before it returns, whether it succeeds or not.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::ir::{
    Op, OpId, OpKind, OpSettings, Tensor, TensorId, TensorKind, Tensors, TopoCons,
};
use crate::names;
use crate::scheduler::{
    DependencyGraph, OpsBeforeKey, RequireOptimalSchedule, ScheduleCacher, SchedulerError,
    SchedulerOptions,
};
use crate::types::{TensorData, TensorInfo};

/// Errors raised while building or editing a [`Graph`].
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GraphError {
    #[error("tensor '{0}' already exists")]
    DuplicateTensor(TensorId),
    #[error("no tensor with id '{0}'")]
    UnknownTensor(TensorId),
    #[error("no op with id {0}")]
    UnknownOp(OpId),
    #[error("tensor id '{0}' uses the reserved gradient prefix")]
    ReservedId(TensorId),
    #[error("tensor '{tensor}' is already produced by op {producer}")]
    AlreadyProduced { tensor: TensorId, producer: OpId },
    #[error("tensor '{tensor}' is {kind} and cannot be an op output")]
    NotComputed { tensor: TensorId, kind: TensorKind },
    #[error("input {index} of {op} is not connected")]
    UnwiredInput { op: String, index: usize },
    #[error("output {index} of {op} is not connected")]
    UnwiredOutput { op: String, index: usize },
    #[error("input '{tensor}' of {op} has no shape information yet")]
    UninferredInput { op: String, tensor: TensorId },
    /// Shape or dtype inference rejected the op's inputs.
    #[error("inference failed for {op}: {message}")]
    Inference { op: String, message: String },
    #[error("{op} has {wired} wired outputs but inference produced {inferred}")]
    OutputCount {
        op: String,
        wired: usize,
        inferred: usize,
    },
    #[error("initial value of '{tensor}' has {found} bytes, {info} needs {expected}")]
    DataSize {
        tensor: TensorId,
        info: TensorInfo,
        expected: usize,
        found: usize,
    },
    #[error("{op} cannot be erased while it still has connected tensors")]
    OpStillConnected { op: String },
    #[error("tensor '{0}' cannot be removed while it has a producer or consumers")]
    TensorStillConnected(TensorId),
    #[error("'{0}' is not a graph output")]
    NotAnOutput(TensorId),
    #[error("'{id}' does not live in scope '{scope}'")]
    ScopeMismatch { scope: String, id: String },
    #[error("{op} has no gradient definition")]
    NotDifferentiable { op: String },
    /// A contract violation that conforming callers never trigger.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GraphError {
    /// Internal errors are fatal; everything else is a validation error of
    /// the call that raised it.
    pub fn is_internal(&self) -> bool {
        matches!(self, GraphError::Internal(_))
    }

    /// Shorthand used by operator inference.
    pub fn inference(op: &str, message: impl Into<String>) -> Self {
        GraphError::Inference {
            op: op.to_string(),
            message: message.into(),
        }
    }
}

/// Tensor infos and setup flags written by one [`Graph::setup_op`] call.
#[derive(Debug, Default)]
struct SetupJournal {
    infos: Vec<(TensorId, Option<TensorInfo>)>,
    newly_setup: Vec<OpId>,
}

/// Scope of a graph. The root graph has the empty scope; nested bodies are
/// named by their path, e.g. `main/loop_body`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct GraphId(pub String);

impl GraphId {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[derive(Debug, Default)]
pub struct Graph {
    id: GraphId,
    tensors: Tensors,
    ops: BTreeMap<OpId, Op>,
    topo_cons: TopoCons,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    next_op_id: u64,
    scheduler_options: SchedulerOptions,
    schedule_cache: ScheduleCacher,
}

impl Graph {
    pub fn new(id: GraphId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn id(&self) -> &GraphId {
        &self.id
    }

    // ---- tensor creation -------------------------------------------------

    /// Declare a streamed graph input.
    pub fn add_input(&mut self, id: &str, info: TensorInfo) -> Result<(), GraphError> {
        self.add_stream(id, info)?;
        self.inputs.push(id.to_string());
        Ok(())
    }

    /// Create a host-fed tensor without declaring it a graph input.
    pub fn add_stream(&mut self, id: &str, info: TensorInfo) -> Result<(), GraphError> {
        self.confirm_new_user_id(id)?;
        let mut tensor = Tensor::new(id, TensorKind::Stream);
        tensor.info = Some(info);
        self.tensors.insert(tensor);
        Ok(())
    }

    pub fn add_const_init(
        &mut self,
        id: &str,
        info: TensorInfo,
        data: TensorData,
    ) -> Result<(), GraphError> {
        self.confirm_new_user_id(id)?;
        self.add_initialised(id, TensorKind::Constant, info, data)
    }

    pub fn add_var_init(
        &mut self,
        id: &str,
        info: TensorInfo,
        data: TensorData,
    ) -> Result<(), GraphError> {
        self.confirm_new_user_id(id)?;
        self.add_initialised(id, TensorKind::Variable, info, data)
    }

    /// Insert an initialised tensor without the reserved-name check. Used for
    /// tensors the compiler names itself.
    pub(crate) fn add_initialised(
        &mut self,
        id: &str,
        kind: TensorKind,
        info: TensorInfo,
        data: TensorData,
    ) -> Result<(), GraphError> {
        if self.tensors.contains(id) {
            return Err(GraphError::DuplicateTensor(id.to_string()));
        }
        if !data.matches(&info) {
            return Err(GraphError::DataSize {
                tensor: id.to_string(),
                expected: info.nbytes(),
                found: data.len(),
                info,
            });
        }
        let mut tensor = Tensor::new(id, kind);
        tensor.info = Some(info);
        tensor.data = Some(data);
        self.tensors.insert(tensor);
        Ok(())
    }

    fn confirm_new_user_id(&self, id: &str) -> Result<(), GraphError> {
        if names::is_reserved_id(id) {
            return Err(GraphError::ReservedId(id.to_string()));
        }
        if self.tensors.contains(id) {
            return Err(GraphError::DuplicateTensor(id.to_string()));
        }
        Ok(())
    }

    /// Append an existing tensor to the declared inputs.
    pub fn mark_as_input(&mut self, id: &str) -> Result<(), GraphError> {
        self.require_tensor(id)?;
        if !self.inputs.iter().any(|t| t == id) {
            self.inputs.push(id.to_string());
        }
        Ok(())
    }

    /// Append an existing tensor to the declared outputs.
    pub fn mark_as_output(&mut self, id: &str) -> Result<(), GraphError> {
        self.require_tensor(id)?;
        if !self.outputs.iter().any(|t| t == id) {
            self.outputs.push(id.to_string());
        }
        Ok(())
    }

    pub fn remove_output(&mut self, id: &str) -> Result<(), GraphError> {
        let pos = self
            .outputs
            .iter()
            .position(|t| t == id)
            .ok_or_else(|| GraphError::NotAnOutput(id.to_string()))?;
        self.outputs.remove(pos);
        Ok(())
    }

    pub fn input_index(&self, id: &str) -> Option<usize> {
        self.inputs.iter().position(|t| t == id)
    }

    pub fn output_index(&self, id: &str) -> Option<usize> {
        self.outputs.iter().position(|t| t == id)
    }

    /// Remove a tensor that has no producer and no consumers. It is also
    /// dropped from the declared inputs and outputs.
    pub fn remove_tensor(&mut self, id: &str) -> Result<Tensor, GraphError> {
        let tensor = self.require_tensor(id)?;
        if tensor.has_producer() || !tensor.consumers.is_empty() {
            return Err(GraphError::TensorStillConnected(id.to_string()));
        }
        self.inputs.retain(|t| t != id);
        self.outputs.retain(|t| t != id);
        self.tensors
            .remove(id)
            .ok_or_else(|| GraphError::UnknownTensor(id.to_string()))
    }

    // ---- op creation and wiring -----------------------------------------

    /// Create an unwired op. Ids are strictly increasing within a graph.
    pub fn create_op(&mut self, kind: Box<dyn OpKind>, settings: OpSettings) -> OpId {
        let id = OpId(self.next_op_id);
        self.next_op_id += 1;
        self.ops.insert(id, Op::new(id, kind, settings));
        id
    }

    /// Wire `tensor` as input `index` of `op`, replacing whatever was wired
    /// there. When `op` is already set up, its outputs and every set-up
    /// consumer are re-inferred; a rejection anywhere leaves the graph
    /// untouched.
    pub fn connect_in_tensor(
        &mut self,
        op: OpId,
        index: usize,
        tensor: &str,
    ) -> Result<(), GraphError> {
        self.require_tensor(tensor)?;
        let is_setup = self.require_op(op)?.is_setup;
        if is_setup {
            self.infer_op(op, Some((index, tensor)))?;
        }

        let previous = {
            let o = self.require_op_mut(op)?;
            o.input.insert(index, tensor.to_string())
        };
        if let Some(prev) = &previous {
            self.tensor_mut(prev)?.consumers.decrement(op);
        }
        self.tensor_mut(tensor)?.consumers.increment(op);

        if is_setup {
            if let Err(err) = self.setup_op(op) {
                self.restore_input(op, index, tensor, previous)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Undo a rewire of input `index` from `previous` to `current`.
    fn restore_input(
        &mut self,
        op: OpId,
        index: usize,
        current: &str,
        previous: Option<TensorId>,
    ) -> Result<(), GraphError> {
        {
            let o = self.require_op_mut(op)?;
            match &previous {
                Some(prev) => o.input.insert(index, prev.clone()),
                None => o.input.remove(index),
            };
        }
        self.tensor_mut(current)?.consumers.decrement(op);
        if let Some(prev) = &previous {
            self.tensor_mut(prev)?.consumers.increment(op);
        }
        Ok(())
    }

    /// Unwire input `index` of `op`, returning the tensor that was there.
    pub fn disconnect_in_tensor(&mut self, op: OpId, index: usize) -> Result<TensorId, GraphError> {
        let o = self.require_op_mut(op)?;
        let id = match o.input.remove(index) {
            Some(id) => id,
            None => {
                return Err(GraphError::UnwiredInput {
                    op: o.debug_name(),
                    index,
                })
            }
        };
        if !self.tensor_mut(&id)?.consumers.decrement(op) {
            return Err(GraphError::Internal(format!(
                "op {op} consumed '{id}' without a consumer back-reference"
            )));
        }
        Ok(id)
    }

    /// Create a new computed tensor and wire it as output `index` of `op`.
    pub fn create_and_connect_out_tensor(
        &mut self,
        op: OpId,
        index: usize,
        id: &str,
    ) -> Result<(), GraphError> {
        if self.tensors.contains(id) {
            return Err(GraphError::DuplicateTensor(id.to_string()));
        }
        self.require_op(op)?;
        self.tensors.insert(Tensor::new(id, TensorKind::Computed));
        self.connect_out_tensor(op, index, id)
    }

    /// Wire an existing computed tensor without a producer as output `index`
    /// of `op`.
    pub fn connect_out_tensor(
        &mut self,
        op: OpId,
        index: usize,
        id: &str,
    ) -> Result<(), GraphError> {
        let tensor = self.require_tensor(id)?;
        if let Some(producer) = tensor.producer {
            return Err(GraphError::AlreadyProduced {
                tensor: id.to_string(),
                producer,
            });
        }
        if tensor.kind != TensorKind::Computed {
            return Err(GraphError::NotComputed {
                tensor: id.to_string(),
                kind: tensor.kind,
            });
        }

        let (previous, is_setup) = {
            let o = self.require_op_mut(op)?;
            (o.output.insert(index, id.to_string()), o.is_setup)
        };
        if let Some(prev) = &previous {
            self.tensor_mut(prev)?.producer = None;
        }
        self.tensor_mut(id)?.producer = Some(op);

        if is_setup {
            if let Err(err) = self.setup_op(op) {
                {
                    let o = self.require_op_mut(op)?;
                    match &previous {
                        Some(prev) => o.output.insert(index, prev.clone()),
                        None => o.output.remove(index),
                    };
                }
                self.tensor_mut(id)?.producer = None;
                if let Some(prev) = &previous {
                    self.tensor_mut(prev)?.producer = Some(op);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Unwire output `index` of `op`; the tensor stays in the graph without
    /// a producer.
    pub fn disconnect_out_tensor(&mut self, op: OpId, index: usize) -> Result<TensorId, GraphError> {
        let o = self.require_op_mut(op)?;
        let id = match o.output.remove(index) {
            Some(id) => id,
            None => {
                return Err(GraphError::UnwiredOutput {
                    op: o.debug_name(),
                    index,
                })
            }
        };
        self.tensor_mut(&id)?.producer = None;
        Ok(id)
    }

    /// Disconnect every input and output of `op`.
    pub fn disconnect_all(&mut self, op: OpId) -> Result<(), GraphError> {
        let (ins, outs): (Vec<usize>, Vec<usize>) = {
            let o = self.require_op(op)?;
            (
                o.input.iter().map(|(i, _)| i).collect(),
                o.output.iter().map(|(i, _)| i).collect(),
            )
        };
        for index in ins {
            self.disconnect_in_tensor(op, index)?;
        }
        for index in outs {
            self.disconnect_out_tensor(op, index)?;
        }
        Ok(())
    }

    /// Run inference for `op` and store the output infos. Consumers that are
    /// already set up are re-validated when an output info changes. If any
    /// op along the way rejects its inputs, every info written by this call
    /// is restored.
    pub fn setup_op(&mut self, op: OpId) -> Result<(), GraphError> {
        let mut journal = SetupJournal::default();
        let result = self.propagate_setup(op, &mut journal);
        if result.is_err() {
            for (id, info) in journal.infos.into_iter().rev() {
                if let Some(tensor) = self.tensors.get_mut(&id) {
                    tensor.info = info;
                }
            }
            for id in journal.newly_setup {
                if let Some(o) = self.ops.get_mut(&id) {
                    o.is_setup = false;
                }
            }
        }
        result
    }

    fn propagate_setup(&mut self, op: OpId, journal: &mut SetupJournal) -> Result<(), GraphError> {
        let mut pending = VecDeque::from([op]);
        let mut visited = BTreeSet::new();

        while let Some(current) = pending.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let infos = self.infer_op(current, None)?;
            let (name, outputs) = {
                let o = self.require_op(current)?;
                let outputs: Vec<(usize, TensorId)> =
                    o.output.iter().map(|(i, t)| (i, t.clone())).collect();
                (o.debug_name(), outputs)
            };
            if outputs.iter().any(|(i, _)| *i >= infos.len()) {
                return Err(GraphError::OutputCount {
                    op: name,
                    wired: outputs.len(),
                    inferred: infos.len(),
                });
            }

            for (index, id) in outputs {
                let info = infos[index].clone();
                let tensor = self.tensor_mut(&id)?;
                if tensor.info.as_ref() != Some(&info) {
                    let old = tensor.info.replace(info);
                    journal.infos.push((id.clone(), old));
                    let consumers: Vec<OpId> = tensor.consumers.ops().collect();
                    for c in consumers {
                        if self.ops.get(&c).map_or(false, |o| o.is_setup) {
                            pending.push_back(c);
                        }
                    }
                }
            }
            let o = self.require_op_mut(current)?;
            if !o.is_setup {
                o.is_setup = true;
                journal.newly_setup.push(current);
            }
        }
        Ok(())
    }

    /// Infer output infos for `op`, optionally as if `tensor` were wired at
    /// `index`.
    fn infer_op(
        &self,
        op: OpId,
        candidate: Option<(usize, &str)>,
    ) -> Result<Vec<TensorInfo>, GraphError> {
        let o = self.require_op(op)?;
        let mut span = o.input.span();
        if let Some((index, _)) = candidate {
            span = span.max(index + 1);
        }

        let mut infos = vec![None; span];
        let wired = o.input.iter().map(|(i, t)| (i, t.as_str()));
        for (index, id) in wired.chain(candidate) {
            let tensor = self.require_tensor(id)?;
            let info = tensor.info.clone().ok_or_else(|| GraphError::UninferredInput {
                op: o.debug_name(),
                tensor: id.to_string(),
            })?;
            infos[index] = Some(info);
        }

        o.kind.infer(&infos).map_err(|err| match err {
            GraphError::Inference { message, .. } => GraphError::Inference {
                op: o.debug_name(),
                message,
            },
            other => other,
        })
    }

    /// Remove a fully disconnected op together with every ordering
    /// constraint that mentions it.
    pub fn erase_op(&mut self, op: OpId) -> Result<Op, GraphError> {
        let o = self.require_op(op)?;
        if !o.input.is_empty() || !o.output.is_empty() {
            return Err(GraphError::OpStillConnected {
                op: o.debug_name(),
            });
        }
        self.topo_cons.remove(op);
        if self.topo_cons.mentions(op) {
            return Err(GraphError::Internal(format!(
                "ordering constraints still reference erased op {op}"
            )));
        }
        self.ops.remove(&op).ok_or(GraphError::UnknownOp(op))
    }

    /// Rewire every consumer of `old` to read `new` at the same indices and
    /// substitute `new` in the declared outputs.
    pub fn replace_tensor(&mut self, old: &str, new: &str) -> Result<(), GraphError> {
        self.require_tensor(new)?;
        let edges: Vec<(OpId, usize)> = {
            let tensor = self.require_tensor(old)?;
            tensor
                .consumers
                .ops()
                .flat_map(|op| {
                    self.ops
                        .get(&op)
                        .map(|o| o.input.indices(old))
                        .unwrap_or_default()
                        .into_iter()
                        .map(move |i| (op, i))
                })
                .collect()
        };
        for (op, index) in edges {
            self.connect_in_tensor(op, index, new)?;
        }
        for out in self.outputs.iter_mut() {
            if out == old {
                *out = new.to_string();
            }
        }
        Ok(())
    }

    // ---- ordering constraints -------------------------------------------

    pub fn add_topo_con(&mut self, before: OpId, after: OpId) -> Result<(), GraphError> {
        self.require_op(before)?;
        self.require_op(after)?;
        self.topo_cons.insert(before, after);
        Ok(())
    }

    /// For every input an op writes in place, make all other readers of that
    /// tensor run first, except readers downstream of the writer. Writers of
    /// the same tensor run in creation order. Returns the number of
    /// constraints inserted.
    pub fn set_modifier_constraints(&mut self) -> usize {
        let mut writes: Vec<(OpId, TensorId)> = Vec::new();
        for (&id, op) in &self.ops {
            for tensor in op.input.tensor_ids() {
                if self.modifies_tensor(id, &tensor) {
                    writes.push((id, tensor));
                }
            }
        }

        let mut inserted = 0;
        for (writer, tensor_id) in writes {
            let readers: Vec<OpId> = match self.tensors.get(&tensor_id) {
                Some(tensor) => tensor.consumers.ops().filter(|r| *r != writer).collect(),
                None => continue,
            };
            // Only edges into `writer` are added below, so its downstream
            // set stays fixed for this loop.
            let downstream = self.downstream_of(writer);
            for reader in readers {
                if downstream.contains(&reader) || self.topo_cons.contains(reader, writer) {
                    continue;
                }
                if reader > writer && self.modifies_tensor(reader, &tensor_id) {
                    continue;
                }
                self.topo_cons.insert(reader, writer);
                inserted += 1;
            }
        }
        inserted
    }

    fn modifies_tensor(&self, op: OpId, tensor: &str) -> bool {
        self.ops.get(&op).map_or(false, |o| {
            o.input
                .indices(tensor)
                .into_iter()
                .any(|index| o.kind.modifies(index))
        })
    }

    /// Ops reachable from `op` through data edges and constraints.
    fn downstream_of(&self, op: OpId) -> BTreeSet<OpId> {
        let edges = self.edge_map();
        let mut seen = BTreeSet::new();
        let mut stack = vec![op];
        while let Some(current) = stack.pop() {
            for next in edges.get(&current).into_iter().flatten() {
                if seen.insert(*next) {
                    stack.push(*next);
                }
            }
        }
        seen
    }

    /// Op -> ops that must follow it, through data edges and constraints.
    pub fn edge_map(&self) -> BTreeMap<OpId, BTreeSet<OpId>> {
        let mut map: BTreeMap<OpId, BTreeSet<OpId>> = BTreeMap::new();
        for (&id, op) in &self.ops {
            let entry = map.entry(id).or_default();
            for (_, out) in op.output.iter() {
                if let Some(tensor) = self.tensors.get(out) {
                    entry.extend(tensor.consumers.ops().filter(|c| *c != id));
                }
            }
        }
        for (before, after) in self.topo_cons.edges() {
            map.entry(before).or_default().insert(after);
        }
        map
    }

    // ---- scheduling ------------------------------------------------------

    pub fn scheduler_options(&self) -> &SchedulerOptions {
        &self.scheduler_options
    }

    /// Replace the scheduler options. A cached schedule computed under
    /// different options is dropped.
    pub fn set_scheduler_options(&mut self, options: SchedulerOptions) {
        if self.scheduler_options != options {
            self.schedule_cache.invalidate();
            self.scheduler_options = options;
        }
    }

    pub fn schedule_cache(&self) -> &ScheduleCacher {
        &self.schedule_cache
    }

    /// A valid, liveness-optimised order of every op. `extra` adds
    /// constraints for this query only (after -> befores).
    pub fn get_op_schedule(
        &mut self,
        extra: &OpsBeforeKey,
        optimal: RequireOptimalSchedule,
    ) -> Result<Vec<OpId>, SchedulerError> {
        let dag = DependencyGraph::build(self, extra, &self.scheduler_options)?;
        self.schedule_cache
            .schedule(dag, optimal, &self.scheduler_options)
    }

    /// Whether any valid order exists, without the optimisation phase.
    pub fn is_schedulable(&self, extra: &OpsBeforeKey) -> bool {
        DependencyGraph::build(self, extra, &self.scheduler_options)
            .and_then(|dag| crate::scheduler::kahn_order(&dag, &self.scheduler_options, false))
            .is_ok()
    }

    /// Pin the current optimal schedule by chaining it into the ordering
    /// constraints.
    pub fn freeze_schedule(&mut self, extra: &OpsBeforeKey) -> Result<(), SchedulerError> {
        let order = self.get_op_schedule(extra, RequireOptimalSchedule::Yes)?;
        for pair in order.windows(2) {
            self.topo_cons.insert(pair[0], pair[1]);
        }
        Ok(())
    }

    /// For each step of `schedule`, the ops whose outputs are still awaited
    /// by a later op.
    pub fn live_sets(&self, schedule: &[OpId]) -> Result<Vec<BTreeSet<OpId>>, GraphError> {
        let mut position = BTreeMap::new();
        for (pos, op) in schedule.iter().enumerate() {
            self.require_op(*op)?;
            if position.insert(*op, pos).is_some() {
                return Err(GraphError::Internal(format!(
                    "op {op} appears twice in the schedule"
                )));
            }
        }

        let mut last_use = Vec::with_capacity(schedule.len());
        for (pos, op) in schedule.iter().enumerate() {
            let mut last = pos;
            for (_, out) in self.require_op(*op)?.output.iter() {
                for consumer in self.require_tensor(out)?.consumers.ops() {
                    match position.get(&consumer) {
                        Some(&p) if p > pos => last = last.max(p),
                        _ => {
                            return Err(GraphError::Internal(format!(
                                "schedule does not run consumer {consumer} after op {op}"
                            )))
                        }
                    }
                }
            }
            last_use.push(last);
        }

        Ok((0..schedule.len())
            .map(|step| {
                (0..=step)
                    .filter(|&j| last_use[j] > step)
                    .map(|j| schedule[j])
                    .collect()
            })
            .collect())
    }

    // ---- scopes ----------------------------------------------------------

    pub fn add_scope(&self, id: &str) -> String {
        names::add_scope(&self.id.0, id)
    }

    pub fn remove_scope(&self, id: &str) -> Result<String, GraphError> {
        names::remove_scope(&self.id.0, id)
            .map(str::to_string)
            .ok_or_else(|| GraphError::ScopeMismatch {
                scope: self.id.0.clone(),
                id: id.to_string(),
            })
    }

    // ---- queries ---------------------------------------------------------

    pub fn tensors(&self) -> &Tensors {
        &self.tensors
    }

    pub(crate) fn tensors_mut(&mut self) -> &mut Tensors {
        &mut self.tensors
    }

    pub fn tensor(&self, id: &str) -> Option<&Tensor> {
        self.tensors.get(id)
    }

    pub fn tensor_info(&self, id: &str) -> Result<&TensorInfo, GraphError> {
        self.require_tensor(id)?
            .info
            .as_ref()
            .ok_or_else(|| GraphError::Internal(format!("tensor '{id}' has no info")))
    }

    pub fn op(&self, id: OpId) -> Option<&Op> {
        self.ops.get(&id)
    }

    /// Mutable access for settings; wiring is only changed through the
    /// graph.
    pub fn op_mut(&mut self, id: OpId) -> Option<&mut Op> {
        self.ops.get_mut(&id)
    }

    pub fn ops(&self) -> impl Iterator<Item = &Op> {
        self.ops.values()
    }

    pub fn op_ids(&self) -> Vec<OpId> {
        self.ops.keys().copied().collect()
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    /// Ops whose type name equals `op_type`, in creation order.
    pub fn ops_of_type(&self, op_type: &str) -> Vec<OpId> {
        self.ops
            .values()
            .filter(|o| o.op_type() == op_type)
            .map(|o| o.id)
            .collect()
    }

    pub fn tensors_of_kind(&self, kind: TensorKind) -> Vec<TensorId> {
        self.tensors.ids_of_kind(kind)
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn topo_cons(&self) -> &TopoCons {
        &self.topo_cons
    }

    pub(crate) fn require_tensor(&self, id: &str) -> Result<&Tensor, GraphError> {
        self.tensors
            .get(id)
            .ok_or_else(|| GraphError::UnknownTensor(id.to_string()))
    }

    fn tensor_mut(&mut self, id: &str) -> Result<&mut Tensor, GraphError> {
        self.tensors
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownTensor(id.to_string()))
    }

    pub(crate) fn require_op(&self, id: OpId) -> Result<&Op, GraphError> {
        self.ops.get(&id).ok_or(GraphError::UnknownOp(id))
    }

    pub(crate) fn require_op_mut(&mut self, id: OpId) -> Result<&mut Op, GraphError> {
        self.ops.get_mut(&id).ok_or(GraphError::UnknownOp(id))
    }
}
