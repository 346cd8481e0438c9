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

use crate::ir::OpId;

/// Auxiliary must-precede edges between ops, beyond data dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopoCons {
    // after -> befores
    before: BTreeMap<OpId, BTreeSet<OpId>>,
    // before -> afters
    after: BTreeMap<OpId, BTreeSet<OpId>>,
}

impl TopoCons {
    /// Require `before` to run ahead of `after`. Self edges are ignored.
    pub fn insert(&mut self, before: OpId, after: OpId) {
        if before == after {
            return;
        }
        self.before.entry(after).or_default().insert(before);
        self.after.entry(before).or_default().insert(after);
    }

    pub fn contains(&self, before: OpId, after: OpId) -> bool {
        self.before
            .get(&after)
            .map_or(false, |set| set.contains(&before))
    }

    /// Drop every constraint mentioning `op`.
    pub fn remove(&mut self, op: OpId) {
        if let Some(befores) = self.before.remove(&op) {
            for b in befores {
                remove_from(&mut self.after, b, op);
            }
        }
        if let Some(afters) = self.after.remove(&op) {
            for a in afters {
                remove_from(&mut self.before, a, op);
            }
        }
    }

    pub fn mentions(&self, op: OpId) -> bool {
        self.before.contains_key(&op) || self.after.contains_key(&op)
    }

    /// Every `(before, after)` pair, sorted.
    pub fn edges(&self) -> Vec<(OpId, OpId)> {
        self.after
            .iter()
            .flat_map(|(b, afters)| afters.iter().map(move |a| (*b, *a)))
            .collect()
    }
}

fn remove_from(map: &mut BTreeMap<OpId, BTreeSet<OpId>>, key: OpId, value: OpId) {
    if let Some(set) = map.get_mut(&key) {
        set.remove(&value);
        if set.is_empty() {
            map.remove(&key);
        }
    }
}
