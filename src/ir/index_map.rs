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

use crate::ir::TensorId;

/// Invertible table from op input (or output) index to tensor id.
///
/// Indices may be sparse: an unwired index is simply absent. A tensor can
/// appear at several indices of the same op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TensorIndexMap {
    by_index: BTreeMap<usize, TensorId>,
    by_id: BTreeMap<TensorId, BTreeSet<usize>>,
}

impl TensorIndexMap {
    /// Wire `id` at `index`, returning the tensor previously wired there.
    pub fn insert(&mut self, index: usize, id: TensorId) -> Option<TensorId> {
        let previous = self.remove(index);
        self.by_id.entry(id.clone()).or_default().insert(index);
        self.by_index.insert(index, id);
        previous
    }

    /// Unwire `index`, returning the tensor that was there.
    pub fn remove(&mut self, index: usize) -> Option<TensorId> {
        let id = self.by_index.remove(&index)?;
        if let Some(indices) = self.by_id.get_mut(&id) {
            indices.remove(&index);
            if indices.is_empty() {
                self.by_id.remove(&id);
            }
        }
        Some(id)
    }

    pub fn id(&self, index: usize) -> Option<&TensorId> {
        self.by_index.get(&index)
    }

    pub fn has_index(&self, index: usize) -> bool {
        self.by_index.contains_key(&index)
    }

    /// Every index `id` is wired at, ascending.
    pub fn indices(&self, id: &str) -> Vec<usize> {
        self.by_id
            .get(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// `(index, tensor)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TensorId)> {
        self.by_index.iter().map(|(i, id)| (*i, id))
    }

    /// Distinct tensor ids, sorted.
    pub fn tensor_ids(&self) -> Vec<TensorId> {
        self.by_id.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// One past the highest wired index.
    pub fn span(&self) -> usize {
        self.by_index.keys().next_back().map_or(0, |max| max + 1)
    }
}
