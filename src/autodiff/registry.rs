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

//! Partial-to-complete bookkeeping used during one autodiff traversal.

use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{Op, OpId, TensorId};

use super::AutodiffError;

/// Collects the partial gradients of each forward tensor. A tensor becomes
/// complete once it holds as many partials as it has expected edges.
#[derive(Debug, Default)]
pub struct TensorGradRegistry {
    expected: BTreeMap<TensorId, usize>,
    partial: BTreeMap<TensorId, Vec<TensorId>>,
    complete: BTreeMap<TensorId, Vec<TensorId>>,
}

impl TensorGradRegistry {
    pub fn set_expected(&mut self, tensor: &str, edges: usize) {
        self.expected.insert(tensor.to_string(), edges);
    }

    pub fn expected(&self, tensor: &str) -> Option<usize> {
        self.expected.get(tensor).copied()
    }

    pub fn insert(&mut self, tensor: &str, grad: TensorId) -> Result<(), AutodiffError> {
        let expected = self.expected(tensor).ok_or_else(|| {
            AutodiffError::Internal(format!("gradient '{grad}' registered for untracked '{tensor}'"))
        })?;
        let partials = self.partial.entry(tensor.to_string()).or_default();
        if partials.contains(&grad) {
            return Err(AutodiffError::Internal(format!(
                "gradient '{grad}' of '{tensor}' registered twice"
            )));
        }
        partials.push(grad);
        if partials.len() > expected {
            return Err(AutodiffError::Internal(format!(
                "'{tensor}' received {} gradients but expects {expected}",
                partials.len()
            )));
        }
        self.try_complete(tensor);
        Ok(())
    }

    /// One expected edge will never deliver a gradient.
    pub fn decrement_expected(&mut self, tensor: &str) -> Result<(), AutodiffError> {
        match self.expected.get_mut(tensor) {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                return Err(AutodiffError::Internal(format!(
                    "no outstanding gradient edge of '{tensor}' to drop"
                )))
            }
        }
        self.try_complete(tensor);
        Ok(())
    }

    fn try_complete(&mut self, tensor: &str) {
        let expected = self.expected(tensor).unwrap_or(0);
        let have = self.partial.get(tensor).map_or(0, Vec::len);
        if have != expected {
            return;
        }
        self.expected.remove(tensor);
        let partials = self.partial.remove(tensor).unwrap_or_default();
        self.complete.insert(tensor.to_string(), partials);
    }

    /// Drain every complete tensor with its partials.
    pub fn pop_complete(&mut self) -> BTreeMap<TensorId, Vec<TensorId>> {
        std::mem::take(&mut self.complete)
    }

    /// Tensors still waiting for gradients.
    pub fn outstanding(&self) -> Vec<TensorId> {
        self.expected.keys().cloned().collect()
    }
}

/// Collects which outputs of each forward op have a complete gradient. An
/// op becomes complete when its own readiness predicate accepts the set.
#[derive(Debug, Default)]
pub struct OpGradRegistry {
    required: BTreeMap<OpId, BTreeSet<usize>>,
    partial: BTreeMap<OpId, BTreeSet<usize>>,
    complete: BTreeSet<OpId>,
    drained: BTreeSet<OpId>,
}

impl OpGradRegistry {
    pub fn set_required(&mut self, op: OpId, outputs: BTreeSet<usize>) {
        self.required.insert(op, outputs);
    }

    pub fn insert(&mut self, op: &Op, out_index: usize) -> Result<(), AutodiffError> {
        let id = op.id();
        if self.drained.contains(&id) {
            return Err(AutodiffError::Internal(format!(
                "gradient for output {out_index} of {} arrived after its gradient ops were grown",
                op.debug_name()
            )));
        }
        let available = self.partial.entry(id).or_default();
        if !available.insert(out_index) {
            return Err(AutodiffError::Internal(format!(
                "gradient for output {out_index} of {} registered twice",
                op.debug_name()
            )));
        }
        let required = self.required.get(&id).cloned().unwrap_or_default();
        if op.kind().ready_to_create_gradients(available, &required) {
            self.complete.insert(id);
        }
        Ok(())
    }

    /// Output `out_index` of `op` will never receive a gradient. Returns
    /// `true` when no output of `op` can deliver one any more, in which case
    /// the op is retired without growing gradient ops.
    pub fn drop_output(&mut self, op: &Op, out_index: usize) -> bool {
        let id = op.id();
        if self.drained.contains(&id) {
            return false;
        }
        let required = self.required.entry(id).or_default();
        required.remove(&out_index);
        let available = self.partial.get(&id).cloned().unwrap_or_default();
        if available.is_empty() {
            if required.is_empty() {
                self.complete.remove(&id);
                self.drained.insert(id);
                return true;
            }
            return false;
        }
        if op.kind().ready_to_create_gradients(&available, required) {
            self.complete.insert(id);
        }
        false
    }

    /// Drain the complete ops in id order. They never become complete again.
    pub fn pop_complete(&mut self) -> Vec<OpId> {
        let ops = std::mem::take(&mut self.complete);
        for op in &ops {
            self.partial.remove(op);
            self.drained.insert(*op);
        }
        ops.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Graph, OpSettings};
    use crate::ops::Identity;

    #[test]
    fn tensor_completes_only_after_every_edge() {
        let mut reg = TensorGradRegistry::default();
        reg.set_expected("w", 3);
        reg.insert("w", "d__w_0_0".into()).expect("first");
        reg.insert("w", "d__w_1_0".into()).expect("second");
        assert!(reg.pop_complete().is_empty());

        reg.insert("w", "d__w_2_0".into()).expect("third");
        let done = reg.pop_complete();
        assert_eq!(done["w"].len(), 3);
        assert!(reg.pop_complete().is_empty());
    }

    #[test]
    fn dropped_edge_completes_tensor() {
        let mut reg = TensorGradRegistry::default();
        reg.set_expected("x", 2);
        reg.insert("x", "d__x_0_0".into()).expect("insert");
        reg.decrement_expected("x").expect("decrement");
        assert_eq!(reg.pop_complete()["x"], vec!["d__x_0_0".to_string()]);
    }

    #[test]
    fn over_registration_is_internal() {
        let mut reg = TensorGradRegistry::default();
        reg.set_expected("x", 1);
        reg.insert("x", "a".into()).expect("insert");
        assert!(matches!(
            reg.insert("x", "b".into()),
            Err(AutodiffError::Internal(_))
        ));
    }

    #[test]
    fn edge_dropped_to_zero_completes_without_partials() {
        let mut reg = TensorGradRegistry::default();
        reg.set_expected("mask", 1);
        reg.decrement_expected("mask").expect("decrement");
        assert_eq!(reg.pop_complete()["mask"], Vec::<TensorId>::new());
    }

    #[test]
    fn dropping_every_output_retires_the_op() {
        let mut graph = Graph::default();
        let id = graph.create_op(Box::new(Identity), OpSettings::default());
        let op = graph.op(id).expect("op");

        let mut reg = OpGradRegistry::default();
        reg.set_required(id, BTreeSet::from([0]));
        assert!(reg.drop_output(op, 0));
        assert!(reg.pop_complete().is_empty());
        assert!(matches!(reg.insert(op, 0), Err(AutodiffError::Internal(_))));
    }

    #[test]
    fn op_registry_rejects_double_registration() {
        let mut graph = Graph::default();
        let id = graph.create_op(Box::new(Identity), OpSettings::default());
        let op = graph.op(id).expect("op");

        let mut reg = OpGradRegistry::default();
        reg.set_required(id, BTreeSet::from([0]));
        reg.insert(op, 0).expect("insert");
        assert!(matches!(reg.insert(op, 0), Err(AutodiffError::Internal(_))));
        assert_eq!(reg.pop_complete(), vec![id]);
        assert!(matches!(reg.insert(op, 0), Err(AutodiffError::Internal(_))));
    }
}
