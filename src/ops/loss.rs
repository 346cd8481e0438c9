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

//! Loss operators. Each reduces to a scalar the autodiff engine can seed.

use std::collections::BTreeSet;

use crate::ir::{GradOpSpec, Graph, GraphError, Op, OpKind};
use crate::types::{DType, TensorInfo};

use super::grad::{L1Grad, NllGrad};
use super::{check_arity, fwd_in, grad_out, input, require_float};

/// `lambda * sum(|x|)`.
#[derive(Debug, Clone, Copy)]
pub struct L1 {
    pub lambda: f64,
}

impl OpKind for L1 {
    fn op_type(&self) -> &str {
        "L1"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        check_arity(self.op_type(), inputs, 1)?;
        let x = input(self.op_type(), inputs, 0)?;
        require_float(self.op_type(), x)?;
        Ok(vec![TensorInfo::scalar(x.dtype)])
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![GradOpSpec::new(
            Box::new(L1Grad {
                lambda: self.lambda,
            }),
            vec![fwd_in(0, 0), grad_out(1, 0)],
            [(0, 0)],
        )])
    }

    fn is_loss(&self) -> bool {
        true
    }
}

/// Mean negative log-likelihood of `probs[N, C]` at integer `label[N]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nll;

impl OpKind for Nll {
    fn op_type(&self) -> &str {
        "Nll"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        let op = self.op_type();
        check_arity(op, inputs, 2)?;
        let probs = input(op, inputs, 0)?;
        let label = input(op, inputs, 1)?;
        require_float(op, probs)?;
        if !matches!(label.dtype, DType::I32 | DType::I64) {
            return Err(GraphError::inference(
                op,
                format!("labels must be integers, got {label}"),
            ));
        }
        match (probs.shape.as_slice(), label.shape.as_slice()) {
            ([n, _classes], [ln]) if n == ln => Ok(vec![TensorInfo::scalar(probs.dtype)]),
            _ => Err(GraphError::inference(
                op,
                format!("probabilities {probs} do not match labels {label}"),
            )),
        }
    }

    // The label is not differentiable, so no gradient output maps to input 1.
    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![GradOpSpec::new(
            Box::new(NllGrad),
            vec![fwd_in(0, 0), fwd_in(1, 1), grad_out(2, 0)],
            [(0, 0)],
        )])
    }

    fn ready_to_create_gradients(
        &self,
        available: &BTreeSet<usize>,
        _required: &BTreeSet<usize>,
    ) -> bool {
        available.contains(&0)
    }

    fn is_loss(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nll_requires_integer_labels_of_batch_size() {
        let probs = Some(TensorInfo::new(DType::F32, vec![8, 10]));
        let labels = Some(TensorInfo::new(DType::I32, vec![8]));
        let out = Nll.infer(&[probs.clone(), labels]).expect("nll");
        assert_eq!(out[0].nelms(), 1);

        let float_labels = Some(TensorInfo::new(DType::F32, vec![8]));
        assert!(Nll.infer(&[probs.clone(), float_labels]).is_err());
        let short = Some(TensorInfo::new(DType::I64, vec![4]));
        assert!(Nll.infer(&[probs, short]).is_err());
    }
}
