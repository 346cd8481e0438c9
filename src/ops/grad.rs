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

//! Gradient operators grown by the autodiff engine. Their output infos are
//! fixed by the forward inputs they differentiate.

use crate::ir::{GraphError, OpKind};
use crate::types::TensorInfo;

use super::{check_arity, input, same_info};

fn unary_like(op: &str, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
    check_arity(op, inputs, 1)?;
    Ok(vec![input(op, inputs, 0)?.clone()])
}

fn paired(op: &str, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
    check_arity(op, inputs, 2)?;
    let a = input(op, inputs, 0)?;
    same_info(op, a, input(op, inputs, 1)?)?;
    Ok(vec![a.clone()])
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityGrad;

impl OpKind for IdentityGrad {
    fn op_type(&self) -> &str {
        "IdentityGrad"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        unary_like(self.op_type(), inputs)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScaleGrad {
    pub factor: f64,
}

impl OpKind for ScaleGrad {
    fn op_type(&self) -> &str {
        "ScaleGrad"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        unary_like(self.op_type(), inputs)
    }
}

/// Inputs: incoming gradient, the other factor of the product.
#[derive(Debug, Clone, Copy, Default)]
pub struct MulArgGrad;

impl OpKind for MulArgGrad {
    fn op_type(&self) -> &str {
        "MulArgGrad"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        paired(self.op_type(), inputs)
    }
}

/// Inputs: incoming gradient, the forward activation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReluGrad;

impl OpKind for ReluGrad {
    fn op_type(&self) -> &str {
        "ReluGrad"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        paired(self.op_type(), inputs)
    }
}

fn matrix(op: &str, info: &TensorInfo) -> Result<(usize, usize), GraphError> {
    match info.shape.as_slice() {
        [rows, cols] => Ok((*rows, *cols)),
        _ => Err(GraphError::inference(
            op,
            format!("expected a rank-2 tensor, got {info}"),
        )),
    }
}

/// `dA = dY · Bᵀ`. Inputs: dY `[m, n]`, B `[k, n]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatMulLhsGrad;

impl OpKind for MatMulLhsGrad {
    fn op_type(&self) -> &str {
        "MatMulLhsGrad"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        let op = self.op_type();
        check_arity(op, inputs, 2)?;
        let dy = input(op, inputs, 0)?;
        let rhs = input(op, inputs, 1)?;
        let (m, n) = matrix(op, dy)?;
        let (k, rn) = matrix(op, rhs)?;
        if n != rn {
            return Err(GraphError::inference(
                op,
                format!("gradient {dy} does not match rhs {rhs}"),
            ));
        }
        Ok(vec![TensorInfo::new(dy.dtype, vec![m, k])])
    }
}

/// `dB = Aᵀ · dY`. Inputs: A `[m, k]`, dY `[m, n]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatMulRhsGrad;

impl OpKind for MatMulRhsGrad {
    fn op_type(&self) -> &str {
        "MatMulRhsGrad"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        let op = self.op_type();
        check_arity(op, inputs, 2)?;
        let lhs = input(op, inputs, 0)?;
        let dy = input(op, inputs, 1)?;
        let (m, k) = matrix(op, lhs)?;
        let (dm, n) = matrix(op, dy)?;
        if m != dm {
            return Err(GraphError::inference(
                op,
                format!("lhs {lhs} does not match gradient {dy}"),
            ));
        }
        Ok(vec![TensorInfo::new(dy.dtype, vec![k, n])])
    }
}

/// Broadcasts a scalar gradient back to the reduced input's shape.
#[derive(Debug, Clone)]
pub struct ReduceSumGrad {
    pub shape: Vec<usize>,
}

impl OpKind for ReduceSumGrad {
    fn op_type(&self) -> &str {
        "ReduceSumGrad"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        check_arity(self.op_type(), inputs, 1)?;
        let dy = input(self.op_type(), inputs, 0)?;
        if dy.nelms() != 1 {
            return Err(GraphError::inference(
                self.op_type(),
                format!("expected a scalar gradient, got {dy}"),
            ));
        }
        Ok(vec![TensorInfo::new(dy.dtype, self.shape.clone())])
    }
}

/// Inputs: forward input, scalar loss gradient.
#[derive(Debug, Clone, Copy)]
pub struct L1Grad {
    pub lambda: f64,
}

impl OpKind for L1Grad {
    fn op_type(&self) -> &str {
        "L1Grad"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        check_arity(self.op_type(), inputs, 2)?;
        Ok(vec![input(self.op_type(), inputs, 0)?.clone()])
    }
}

/// Inputs: probabilities, labels, scalar loss gradient. Only the
/// probabilities receive a gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct NllGrad;

impl OpKind for NllGrad {
    fn op_type(&self) -> &str {
        "NllGrad"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        check_arity(self.op_type(), inputs, 3)?;
        input(self.op_type(), inputs, 1)?;
        input(self.op_type(), inputs, 2)?;
        Ok(vec![input(self.op_type(), inputs, 0)?.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;

    fn f32s(shape: &[usize]) -> Option<TensorInfo> {
        Some(TensorInfo::new(DType::F32, shape.to_vec()))
    }

    #[test]
    fn matmul_grads_recover_operand_shapes() {
        // A [2,3] · B [3,4] = Y [2,4]
        let da = MatMulLhsGrad.infer(&[f32s(&[2, 4]), f32s(&[3, 4])]).expect("lhs");
        let db = MatMulRhsGrad.infer(&[f32s(&[2, 3]), f32s(&[2, 4])]).expect("rhs");
        assert_eq!(da[0].shape, vec![2, 3]);
        assert_eq!(db[0].shape, vec![3, 4]);
    }

    #[test]
    fn reduce_sum_grad_broadcasts_scalar() {
        let op = ReduceSumGrad { shape: vec![5, 2] };
        assert_eq!(op.infer(&[f32s(&[])]).expect("grad")[0].shape, vec![5, 2]);
        assert!(op.infer(&[f32s(&[3])]).is_err());
    }
}
