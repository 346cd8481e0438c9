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

use crate::ir::{GradOpSpec, Graph, GraphError, Op, OpKind};
use crate::types::TensorInfo;

use super::grad::{MatMulLhsGrad, MatMulRhsGrad, ReduceSumGrad};
use super::{check_arity, fwd_in, grad_out, input, require_float};

/// Rank-2 matrix product `[m, k] · [k, n] -> [m, n]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatMul;

impl OpKind for MatMul {
    fn op_type(&self) -> &str {
        "MatMul"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        let op = self.op_type();
        check_arity(op, inputs, 2)?;
        let lhs = input(op, inputs, 0)?;
        let rhs = input(op, inputs, 1)?;
        require_float(op, lhs)?;
        if lhs.dtype != rhs.dtype {
            return Err(GraphError::inference(
                op,
                format!("dtype mismatch between {lhs} and {rhs}"),
            ));
        }
        match (lhs.shape.as_slice(), rhs.shape.as_slice()) {
            ([m, k], [rk, n]) if k == rk => Ok(vec![TensorInfo::new(lhs.dtype, vec![*m, *n])]),
            _ => Err(GraphError::inference(
                op,
                format!("cannot multiply {lhs} by {rhs}"),
            )),
        }
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![
            GradOpSpec::new(
                Box::new(MatMulLhsGrad),
                vec![grad_out(0, 0), fwd_in(1, 1)],
                [(0, 0)],
            ),
            GradOpSpec::new(
                Box::new(MatMulRhsGrad),
                vec![fwd_in(0, 0), grad_out(1, 0)],
                [(0, 1)],
            ),
        ])
    }
}

/// Sum of every element, producing a scalar.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReduceSum;

impl OpKind for ReduceSum {
    fn op_type(&self) -> &str {
        "ReduceSum"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        check_arity(self.op_type(), inputs, 1)?;
        let x = input(self.op_type(), inputs, 0)?;
        require_float(self.op_type(), x)?;
        Ok(vec![TensorInfo::scalar(x.dtype)])
    }

    fn grad_ops(&self, op: &Op, graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        let x = op.inputs().id(0).ok_or_else(|| GraphError::UnwiredInput {
            op: op.debug_name(),
            index: 0,
        })?;
        let shape = graph.tensor_info(x)?.shape.clone();
        Ok(vec![GradOpSpec::new(
            Box::new(ReduceSumGrad { shape }),
            vec![grad_out(0, 0)],
            [(0, 0)],
        )])
    }
}
