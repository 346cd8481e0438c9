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
use std::fmt;

use crate::ir::OpId;
use crate::types::{TensorData, TensorInfo};

/// Tensor ids are plain strings, unique within one graph scope.
pub type TensorId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TensorKind {
    /// Initialised value that never changes.
    Constant,
    /// Trainable model state, always resident.
    Variable,
    /// Value fed from the host at run time.
    Stream,
    /// Output of exactly one op.
    Computed,
}

impl fmt::Display for TensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TensorKind::Constant => "const",
            TensorKind::Variable => "var",
            TensorKind::Stream => "stream",
            TensorKind::Computed => "computed",
        };
        f.write_str(name)
    }
}

/// Multiset of the ops consuming a tensor. An op that consumes the same
/// tensor at several input indices is counted once per index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consumers {
    counts: BTreeMap<OpId, usize>,
}

impl Consumers {
    pub fn increment(&mut self, op: OpId) {
        *self.counts.entry(op).or_insert(0) += 1;
    }

    /// Returns `false` when `op` was not a consumer.
    pub fn decrement(&mut self, op: OpId) -> bool {
        match self.counts.get_mut(&op) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.counts.remove(&op);
                true
            }
            None => false,
        }
    }

    pub fn count(&self, op: OpId) -> usize {
        self.counts.get(&op).copied().unwrap_or(0)
    }

    /// Total number of consuming edges.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Distinct consuming ops in id order.
    pub fn ops(&self) -> impl Iterator<Item = OpId> + '_ {
        self.counts.keys().copied()
    }

    pub fn contains(&self, op: OpId) -> bool {
        self.counts.contains_key(&op)
    }
}

#[derive(Debug, Clone)]
pub struct Tensor {
    pub id: TensorId,
    pub kind: TensorKind,
    /// Set at creation for initialised and streamed tensors, and by the
    /// producer's inference step for computed ones.
    pub info: Option<TensorInfo>,
    pub data: Option<TensorData>,
    pub producer: Option<OpId>,
    pub consumers: Consumers,
}

impl Tensor {
    pub fn new(id: impl Into<TensorId>, kind: TensorKind) -> Self {
        Self {
            id: id.into(),
            kind,
            info: None,
            data: None,
            producer: None,
            consumers: Consumers::default(),
        }
    }

    pub fn has_producer(&self) -> bool {
        self.producer.is_some()
    }

    /// Bytes the tensor occupies once materialised, zero if not inferred yet.
    pub fn nbytes(&self) -> usize {
        self.info.as_ref().map_or(0, TensorInfo::nbytes)
    }
}

/// The tensor collection owned by one graph.
#[derive(Debug, Clone, Default)]
pub struct Tensors {
    map: BTreeMap<TensorId, Tensor>,
}

impl Tensors {
    pub fn contains(&self, id: &str) -> bool {
        self.map.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Tensor> {
        self.map.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Tensor> {
        self.map.get_mut(id)
    }

    pub(crate) fn insert(&mut self, tensor: Tensor) {
        self.map.insert(tensor.id.clone(), tensor);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Tensor> {
        self.map.remove(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.map.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TensorId> {
        self.map.keys()
    }

    /// Ids of every tensor of `kind`, sorted.
    pub fn ids_of_kind(&self, kind: TensorKind) -> Vec<TensorId> {
        self.map
            .values()
            .filter(|t| t.kind == kind)
            .map(|t| t.id.clone())
            .collect()
    }
}
